//! File tool gateway: dry-run and apply of whole-file writes.
//!
//! The [`FileGateway`] trait is the only way the dispatcher touches the
//! filesystem for task output. Tests use `RecordingFileGateway` from
//! `test_support`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use super::unix_millis;
use crate::core::types::{ApplyResult, DryRunResult, ExecutionContext};

/// Abstraction over file-write backends.
pub trait FileGateway {
    /// Describe what `apply` would do without touching the filesystem.
    fn dry_run(&self, path: &str, content: &str) -> Result<DryRunResult>;

    /// Write `content` to `path`, creating parent directories.
    fn apply(&self, path: &str, content: &str) -> Result<ApplyResult>;
}

/// Writes files relative to a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileGateway {
    root: PathBuf,
}

impl LocalFileGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl FileGateway for LocalFileGateway {
    #[instrument(skip_all, fields(path = %path, bytes = content.len()))]
    fn dry_run(&self, path: &str, content: &str) -> Result<DryRunResult> {
        let target = self.resolve(path);
        let bytes = content.len();
        if target.is_dir() {
            warn!(path, "dry run target is a directory");
            return Ok(DryRunResult {
                description: format!("[DRY-RUN] Cannot write '{path}'."),
                success: false,
                error_message: format!("'{path}' is a directory"),
            });
        }
        let description = if target.exists() {
            format!("[DRY-RUN] Will overwrite existing file '{path}' with {bytes} bytes.")
        } else {
            format!("[DRY-RUN] Will create new file '{path}' with {bytes} bytes.")
        };
        debug!(%description, "dry run");
        Ok(DryRunResult {
            description,
            success: true,
            error_message: String::new(),
        })
    }

    #[instrument(skip_all, fields(path = %path, bytes = content.len()))]
    fn apply(&self, path: &str, content: &str) -> Result<ApplyResult> {
        let target = self.resolve(path);
        let cwd = self.root.display().to_string();
        let bytes = content.len();

        let written = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&target, content));

        let (success, description, error_message, output, exit_code) = match written {
            Ok(()) => {
                info!(path, bytes, "file written");
                (
                    true,
                    format!("[APPLIED] Successfully wrote {bytes} bytes to '{path}'."),
                    String::new(),
                    format!("Created file: {path} ({bytes} bytes)"),
                    0,
                )
            }
            Err(err) => {
                warn!(path, err = %err, "file write failed");
                (
                    false,
                    format!("[FAILED] Could not write '{path}'."),
                    format!("write {}: {err}", target.display()),
                    String::new(),
                    1,
                )
            }
        };

        Ok(ApplyResult {
            description,
            success,
            error_message: error_message.clone(),
            execution_context: ExecutionContext {
                working_directory_before: cwd.clone(),
                working_directory_after: cwd,
                command_output: output,
                command_stderr: error_message,
                exit_code,
                timestamp_ms: unix_millis(),
            },
        })
    }
}
