//! Stable exit codes for `mag` CLI commands.

use crate::error::{ConfigurationError, PolicyViolation, ValidationError};

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, configuration or policy file, or any unclassified error.
pub const INVALID: i32 = 1;
/// The policy refused the requested path, command or action.
pub const DENIED: i32 = 2;
/// The request ran but at least one task or command failed.
pub const FAILED: i32 = 3;

/// Exit code for an error returned by a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<PolicyViolation>().is_some() {
        DENIED
    } else if err.downcast_ref::<ConfigurationError>().is_some()
        || err.downcast_ref::<ValidationError>().is_some()
    {
        INVALID
    } else {
        FAILED
    }
}
