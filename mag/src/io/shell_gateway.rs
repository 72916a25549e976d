//! Shell tool gateway with a working directory that persists across calls.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::process::{Limits, run_captured};
use super::unix_millis;
use crate::core::types::ShellResult;

const PWD_MARKER: &str = "__PWD_MARKER__";

/// Abstraction over shell execution backends.
pub trait ShellGateway {
    /// Run `command` in `working_directory`, or in the gateway's current
    /// directory when `None`. A `cd` inside the command carries over to the
    /// next call.
    fn execute(&self, command: &str, working_directory: Option<&str>) -> Result<ShellResult>;

    /// Directory the next command runs in by default.
    fn current_directory(&self) -> Result<String>;
}

/// Runs commands through `bash -c` on the local machine.
#[derive(Debug)]
pub struct LocalShellGateway {
    cwd: Mutex<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl LocalShellGateway {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            cwd: Mutex::new(cwd.into()),
            timeout,
            output_limit_bytes,
        }
    }

    fn cwd(&self) -> Result<PathBuf> {
        self.cwd
            .lock()
            .map(|cwd| cwd.clone())
            .map_err(|_| anyhow!("shell working directory lock poisoned"))
    }

    fn set_cwd(&self, dir: &Path) -> Result<()> {
        let mut cwd = self
            .cwd
            .lock()
            .map_err(|_| anyhow!("shell working directory lock poisoned"))?;
        *cwd = dir.to_path_buf();
        Ok(())
    }
}

impl ShellGateway for LocalShellGateway {
    #[instrument(skip_all, fields(command = %command))]
    fn execute(&self, command: &str, working_directory: Option<&str>) -> Result<ShellResult> {
        let before = match working_directory {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.cwd()?,
        };
        let before_display = before.display().to_string();
        info!(cwd = %before_display, "executing shell command");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(wrap_command(&before, command));
        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let output = run_captured(cmd, None, limits).context("run shell command")?;

        let (stdout, after) = split_pwd_marker(&output.stdout);
        let after = match after {
            Some(dir) => {
                self.set_cwd(Path::new(&dir))?;
                dir
            }
            None => {
                warn!("final working directory not reported");
                before_display.clone()
            }
        };

        let success = output.success();
        let mut stderr = output.stderr;
        if output.timed_out {
            stderr.push_str(&format!(
                "command timed out after {}s",
                self.timeout.as_secs()
            ));
        }

        debug!(exit_code = output.exit_code, cwd_after = %after, "shell command finished");
        Ok(ShellResult {
            success,
            exit_code: output.exit_code,
            stdout,
            stderr,
            working_directory_before: before_display,
            working_directory_after: after,
            timed_out: output.timed_out,
            timestamp_ms: unix_millis(),
        })
    }

    fn current_directory(&self) -> Result<String> {
        Ok(self.cwd()?.display().to_string())
    }
}

/// `cd` into `dir`, run `command`, report the final directory, keep the command's status.
fn wrap_command(dir: &Path, command: &str) -> String {
    format!(
        "cd {} && {{\n{command}\n}}\n__mag_status=$?\nprintf '\\n{PWD_MARKER}%s\\n' \"$(pwd)\"\nexit $__mag_status",
        single_quote(&dir.display().to_string())
    )
}

fn single_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Strip the marker line from stdout and return the directory it carried.
fn split_pwd_marker(stdout: &str) -> (String, Option<String>) {
    let Some(pos) = stdout.rfind(PWD_MARKER) else {
        return (stdout.to_string(), None);
    };
    let dir = stdout[pos + PWD_MARKER.len()..].lines().next().unwrap_or("");
    let before = &stdout[..pos];
    let before = before.strip_suffix('\n').unwrap_or(before);
    let dir = (!dir.is_empty()).then(|| dir.to_string());
    (before.to_string(), dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Marker parsing strips only the injected line.
    #[test]
    fn split_marker_line() {
        let (out, dir) = split_pwd_marker("hello\n\n__PWD_MARKER__/tmp/x\n");
        assert_eq!(out, "hello\n");
        assert_eq!(dir.as_deref(), Some("/tmp/x"));

        let (out, dir) = split_pwd_marker("no marker");
        assert_eq!(out, "no marker");
        assert!(dir.is_none());
    }

    /// Quotes inside directory names are escaped for `sh`.
    #[test]
    fn single_quote_escapes() {
        assert_eq!(single_quote("/a/it's"), r"'/a/it'\''s'");
    }

    #[cfg(unix)]
    fn gateway(root: &Path) -> LocalShellGateway {
        LocalShellGateway::new(root, Duration::from_secs(10), 10_000)
    }

    /// Stdout, exit code and directories are captured.
    #[cfg(unix)]
    #[test]
    fn executes_and_captures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        let shell = gateway(&root);
        let result = shell.execute("echo hi", None).expect("execute");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.working_directory_before, root.display().to_string());
        assert_eq!(result.working_directory_after, root.display().to_string());
    }

    /// A `cd` in one call changes where the next call runs.
    #[cfg(unix)]
    #[test]
    fn working_directory_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical");
        std::fs::create_dir_all(root.join("sub")).expect("mkdir");
        let shell = gateway(&root);

        let moved = shell.execute("cd sub", None).expect("cd");
        assert_ne!(moved.working_directory_before, moved.working_directory_after);
        let here = shell.execute("pwd", None).expect("pwd");
        assert_eq!(here.stdout.trim(), root.join("sub").display().to_string());
        assert_eq!(
            shell.current_directory().expect("cwd"),
            root.join("sub").display().to_string()
        );
    }

    /// The command's own exit status is reported, not the marker's.
    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shell = gateway(temp.path());
        let result = shell.execute("echo bad >&2; false", None).expect("execute");
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "bad\n");
    }

    /// Timeouts are failures with exit code -1 and a stderr note.
    #[cfg(unix)]
    #[test]
    fn timeout_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shell = LocalShellGateway::new(temp.path(), Duration::from_millis(200), 1000);
        let result = shell.execute("exec sleep 5", None).expect("execute");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }
}
