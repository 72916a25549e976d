//! Envelopes exchanged with the LLM backend and the tool gateways.

use serde::{Deserialize, Serialize};

/// Working-directory and output state captured around an applied operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub working_directory_before: String,
    pub working_directory_after: String,
    pub command_output: String,
    pub command_stderr: String,
    /// 0 for pure file writes.
    pub exit_code: i32,
    /// Unix milliseconds at capture time.
    pub timestamp_ms: u64,
}

impl ExecutionContext {
    /// Stdout followed by a `[STDERR]: ` section when stderr is non-empty.
    pub fn combined_output(&self) -> String {
        if self.command_stderr.is_empty() {
            self.command_output.clone()
        } else {
            format!("{}\n[STDERR]: {}", self.command_output, self.command_stderr)
        }
    }

    pub fn directory_changed(&self) -> bool {
        self.working_directory_before != self.working_directory_after
    }
}

/// LLM-proposed file write (`{"command","path","content"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteProposal {
    /// Source command name, normally `write_file`.
    #[serde(default)]
    pub command: String,
    pub path: String,
    pub content: String,
}

/// LLM-proposed action tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionProposal {
    #[serde(rename = "FILE_WRITE")]
    FileWrite {
        #[serde(default)]
        description: String,
        file_path: String,
        file_content: String,
    },
    #[serde(rename = "BASH_COMMAND")]
    BashCommand {
        #[serde(default)]
        description: String,
        bash_command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
    },
}

impl ActionProposal {
    pub fn description(&self) -> &str {
        match self {
            ActionProposal::FileWrite { description, .. }
            | ActionProposal::BashCommand { description, .. } => description,
        }
    }
}

/// Side-effect-free preview of a file write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunResult {
    pub description: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
}

/// Outcome of an applied file write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub description: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    pub execution_context: ExecutionContext,
}

/// Outcome of a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub working_directory_before: String,
    pub working_directory_after: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl ShellResult {
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            working_directory_before: self.working_directory_before.clone(),
            working_directory_after: self.working_directory_after.clone(),
            command_output: self.stdout.clone(),
            command_stderr: self.stderr.clone(),
            exit_code: self.exit_code,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// One turn of a conversation passed to `chat_with_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}
