//! Typed failures carried inside `anyhow::Error`.
//!
//! Callers that need to branch on the failure class (CLI exit codes, the
//! directive substitution pass) recover these with `downcast_ref`.

use std::fmt;
use std::path::PathBuf;

/// A path or command was denied by the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    /// The path or command that was checked.
    pub target: String,
    /// The specific rule that failed.
    pub reason: String,
}

impl PolicyViolation {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy denied '{}': {}", self.target, self.reason)
    }
}

impl std::error::Error for PolicyViolation {}

/// Malformed input rejected at a store or policy boundary. No state was mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl ValidationError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [only] => f.write_str(only),
            errors => write!(f, "validation failed:\n- {}", errors.join("\n- ")),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A collaborator (LLM backend, tool gateway) was unreachable or returned malformed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationError {
    pub collaborator: String,
    pub message: String,
}

impl CommunicationError {
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.collaborator, self.message)
    }
}

impl std::error::Error for CommunicationError {}

/// A configuration document exists but is unusable. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub path: PathBuf,
    pub errors: Vec<String>,
}

impl ConfigurationError {
    pub fn new(path: impl Into<PathBuf>, errors: Vec<String>) -> Self {
        Self {
            path: path.into(),
            errors,
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid configuration {}:\n- {}",
            self.path.display(),
            self.errors.join("\n- ")
        )
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Typed errors survive a trip through `anyhow` with context attached.
    #[test]
    fn downcast_through_context() {
        let err = anyhow::Error::new(PolicyViolation::new("rm -rf /", "blocked"))
            .context("execute todo 3");
        let violation = err
            .downcast_ref::<PolicyViolation>()
            .expect("policy violation");
        assert_eq!(violation.reason, "blocked");
        assert!(anyhow!("plain").downcast_ref::<PolicyViolation>().is_none());
    }

    /// A single validation message renders without the list framing.
    #[test]
    fn validation_display_single_vs_many() {
        assert_eq!(ValidationError::single("bad").to_string(), "bad");
        let many = ValidationError::new(vec!["a".into(), "b".into()]);
        assert_eq!(many.to_string(), "validation failed:\n- a\n- b");
    }
}
