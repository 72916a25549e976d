//! Policy settings model and the pure checks evaluated against it.
//!
//! Filesystem resolution (canonicalizing a path against the working
//! directory) happens in [`crate::policy`]; everything here operates on
//! strings and already-normalized relative paths.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "1.0";

pub const FILE_TOOL: &str = "file_tool";
pub const BASH_TOOL: &str = "bash_tool";
pub const TODO_TOOL: &str = "todo_tool";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// CRUD operation a tool is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rules for one tool + operation pair.
///
/// `allowed_directories` semantics: an empty list disables the operation, an
/// entry equal to `""` allows every directory, any other entry is a plain
/// string prefix ending in `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPolicy {
    pub allowed_directories: Vec<String>,
    pub confirmation_required: bool,
    /// Shell tool only: first-token allow-list. Empty means no allow-list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_commands: Vec<String>,
    /// Shell tool only: substrings that deny a command outright.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_commands: Vec<String>,
}

impl OperationPolicy {
    fn dirs(dirs: &[&str], confirmation_required: bool) -> Self {
        Self {
            allowed_directories: dirs.iter().map(|dir| (*dir).to_string()).collect(),
            confirmation_required,
            ..Self::default()
        }
    }

    /// Plain prefix test; `""` short-circuits to allowed.
    pub fn allows_directory(&self, relative_path: &str) -> bool {
        self.allowed_directories
            .iter()
            .any(|dir| dir.is_empty() || relative_path.starts_with(dir.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub create: OperationPolicy,
    pub read: OperationPolicy,
    pub update: OperationPolicy,
    pub delete: OperationPolicy,
}

impl ToolPolicy {
    pub fn operation(&self, op: Operation) -> &OperationPolicy {
        match op {
            Operation::Create => &self.create,
            Operation::Read => &self.read,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    pub fn operation_mut(&mut self, op: Operation) -> &mut OperationPolicy {
        match op {
            Operation::Create => &mut self.create,
            Operation::Read => &mut self.read,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPolicy {
    pub blocked_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub auto_backup: bool,
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self {
            blocked_extensions: [".key", ".pem", ".env", ".secret", ".crt"]
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            max_file_size_mb: 10,
            auto_backup: false,
        }
    }
}

/// Whole policy document (`policy.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub version: String,
    pub global: GlobalPolicy,
    pub tools: BTreeMap<String, ToolPolicy>,
}

/// Why a shell command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandViolation {
    /// The command contains a blocked substring.
    Blocked(String),
    /// The first token is not on the allow-list.
    NotAllowed(String),
    /// No shell policy is configured at all.
    NoShellPolicy,
}

impl fmt::Display for CommandViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandViolation::Blocked(pattern) => {
                write!(f, "Command contains blocked operation '{pattern}'")
            }
            CommandViolation::NotAllowed(token) => {
                write!(f, "Command not in allowed list: '{token}'")
            }
            CommandViolation::NoShellPolicy => f.write_str("No bash_tool policy configured"),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        let mut tools = BTreeMap::new();

        tools.insert(
            FILE_TOOL.to_string(),
            ToolPolicy {
                create: OperationPolicy::dirs(&["src/", "tests/", "docs/"], true),
                read: OperationPolicy::dirs(&["src/", "tests/", "docs/"], false),
                update: OperationPolicy::dirs(&["src/", "tests/"], true),
                delete: OperationPolicy::dirs(&[], true),
            },
        );

        tools.insert(
            TODO_TOOL.to_string(),
            ToolPolicy {
                create: OperationPolicy::dirs(&[], false),
                read: OperationPolicy::dirs(&[], false),
                update: OperationPolicy::dirs(&[], false),
                delete: OperationPolicy::dirs(&[], true),
            },
        );

        let mut bash_create = OperationPolicy::dirs(&[], true);
        bash_create.allowed_commands = [
            "make", "cmake", "gcc", "g++", "npm", "cargo", "python", "python3", "pip", "ls", "pwd",
            "find", "grep", "cat", "head", "tail", "wc", "sort", "uniq", "awk", "sed", "git",
        ]
        .iter()
        .map(|cmd| (*cmd).to_string())
        .collect();
        bash_create.blocked_commands = [
            "rm",
            "rmdir",
            "dd",
            "mkfs",
            "format",
            "fdisk",
            "mount",
            "umount",
            "chmod 777",
            "chown",
            "su",
            "sudo",
            "passwd",
            "systemctl",
            "shutdown",
            "reboot",
            "kill -9",
            "curl",
            "wget",
            "nc",
        ]
        .iter()
        .map(|cmd| (*cmd).to_string())
        .collect();
        tools.insert(
            BASH_TOOL.to_string(),
            ToolPolicy {
                create: bash_create,
                read: OperationPolicy::dirs(&[], false),
                update: OperationPolicy::dirs(&[], true),
                delete: OperationPolicy::dirs(&[], true),
            },
        );

        Self {
            version: POLICY_VERSION.to_string(),
            global: GlobalPolicy::default(),
            tools,
        }
    }
}

impl PolicySettings {
    pub fn operation(&self, tool: &str, op: Operation) -> Option<&OperationPolicy> {
        self.tools.get(tool).map(|policy| policy.operation(op))
    }

    /// Prefix check of an already-normalized relative path. Unknown tools deny.
    pub fn directory_allowed(&self, tool: &str, op: Operation, relative_path: &str) -> bool {
        self.operation(tool, op)
            .is_some_and(|policy| policy.allows_directory(relative_path))
    }

    /// Confirmation flag for a tool + operation. Unknown tools require confirmation.
    pub fn confirmation_required(&self, tool: &str, op: Operation) -> bool {
        self.operation(tool, op)
            .is_none_or(|policy| policy.confirmation_required)
    }

    /// True if the path's extension is on the global block-list (case-insensitive).
    ///
    /// A dotfile named exactly like a blocked extension (`.env`) also counts.
    pub fn has_blocked_extension(&self, path: &Path) -> bool {
        let dotted = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
            None => match path.file_name().and_then(|name| name.to_str()) {
                Some(name) if name.starts_with('.') => name.to_ascii_lowercase(),
                _ => return false,
            },
        };
        self.global
            .blocked_extensions
            .iter()
            .any(|blocked| blocked.to_ascii_lowercase() == dotted)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.global.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn file_size_allowed(&self, bytes: u64) -> bool {
        bytes <= self.max_file_size_bytes()
    }

    /// First failing shell rule for `command`, if any.
    ///
    /// Blocked substrings are checked before the allow-list, so a blocked
    /// command is refused even when its first token is allowed.
    pub fn command_violation(&self, command: &str) -> Option<CommandViolation> {
        let Some(policy) = self.operation(BASH_TOOL, Operation::Create) else {
            return Some(CommandViolation::NoShellPolicy);
        };
        if let Some(pattern) = policy
            .blocked_commands
            .iter()
            .find(|pattern| !pattern.is_empty() && command.contains(pattern.as_str()))
        {
            return Some(CommandViolation::Blocked(pattern.clone()));
        }
        if policy.allowed_commands.is_empty() {
            return None;
        }
        let first = command.split_whitespace().next().unwrap_or("");
        if policy.allowed_commands.iter().any(|allowed| allowed == first) {
            None
        } else {
            Some(CommandViolation::NotAllowed(first.to_string()))
        }
    }

    pub fn command_allowed(&self, command: &str) -> bool {
        self.command_violation(command).is_none()
    }
}
