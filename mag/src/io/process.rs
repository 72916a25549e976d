//! Child processes with a wall-clock limit and bounded captured output.
//!
//! Stdin is fed and both output pipes are drained on scoped threads while the
//! caller waits on the child, so neither a chatty child nor one that never
//! reads its input can outlive the timeout.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Wall-clock and capture limits for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_bytes: usize,
}

/// What a finished or killed child left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Lossy UTF-8, ending in `[stdout truncated N bytes]` when capped.
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the child was killed (timeout or signal).
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Run `cmd`, optionally writing `stdin` to it, and capture both streams.
///
/// A child still running after `limits.timeout` is killed and reported with
/// `timed_out = true`, not as an error. Errors are reserved for spawning,
/// waiting and pipe failures.
#[instrument(
    skip_all,
    fields(program = ?cmd.get_program(), timeout_secs = limits.timeout.as_secs())
)]
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: Limits,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(err = %err, "failed to spawn child"))
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    let (Some(out), Some(err)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(anyhow!("child output was not piped"));
    };
    let input = child.stdin.take().zip(stdin);
    debug!(stdin_bytes = stdin.map_or(0, <[u8]>::len), "child spawned");

    thread::scope(|scope| {
        let feeder = input.map(|(pipe, bytes)| scope.spawn(move || feed(pipe, bytes)));
        let stdout = scope.spawn(move || capture(out, limits.output_bytes, "stdout"));
        let stderr = scope.spawn(move || capture(err, limits.output_bytes, "stderr"));

        let waited = child
            .wait_timeout(limits.timeout)
            .context("wait for child")?;
        let (status, timed_out) = match waited {
            Some(status) => (status, false),
            None => {
                warn!(timeout_secs = limits.timeout.as_secs(), "child timed out, killing");
                child.kill().context("kill child")?;
                (child.wait().context("reap killed child")?, true)
            }
        };

        if let Some(feeder) = feeder {
            join(feeder)?;
        }
        let output = ProcessOutput {
            stdout: join(stdout)?,
            stderr: join(stderr)?,
            exit_code: if timed_out {
                -1
            } else {
                status.code().unwrap_or(-1)
            },
            timed_out,
        };
        debug!(exit_code = output.exit_code, timed_out, "child finished");
        Ok(output)
    })
}

/// Write all of `bytes`, then close the pipe so the child sees EOF.
fn feed(mut pipe: ChildStdin, bytes: &[u8]) -> Result<()> {
    match pipe.write_all(bytes) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed stdin before reading all input");
            Ok(())
        }
        other => other.context("write child stdin"),
    }
}

/// Keep the first `limit` bytes of `stream` as text; drain and count the rest.
fn capture(mut stream: impl Read, limit: usize, label: &str) -> Result<String> {
    let mut kept = Vec::new();
    (&mut stream)
        .take(limit as u64)
        .read_to_end(&mut kept)
        .with_context(|| format!("read {label}"))?;
    let dropped =
        io::copy(&mut stream, &mut io::sink()).with_context(|| format!("drain {label}"))?;

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        warn!(stream = label, dropped, "output truncated");
        text.push_str(&format!("\n[{label} truncated {dropped} bytes]\n"));
    }
    Ok(text)
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("child pipe thread panicked"))?
}
