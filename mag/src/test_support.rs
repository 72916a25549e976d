//! Scripted collaborators for unit and integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};

use crate::core::types::{
    ActionProposal, ApplyResult, ChatMessage, DryRunResult, ExecutionContext, FileWriteProposal,
    ShellResult,
};
use crate::error::{CommunicationError, ValidationError};
use crate::io::file_gateway::FileGateway;
use crate::io::llm::{LlmBackend, canonical_provider};
use crate::io::prompt::PromptHints;
use crate::io::config::AppConfig;
use crate::io::shell_gateway::ShellGateway;
use crate::session::{Answer, Confirm, Session};

const SCRIPTED_PROVIDERS: [&str; 4] = ["gemini", "anthropic", "openai", "mistral"];

fn pop<T>(queue: &Mutex<VecDeque<T>>, what: &str) -> Result<T> {
    queue
        .lock()
        .ok()
        .and_then(|mut queue| queue.pop_front())
        .ok_or_else(|| CommunicationError::new("scripted", format!("no scripted {what} left")).into())
}

/// LLM fake answering from queues; an exhausted queue is a communication error.
#[derive(Debug)]
pub struct ScriptedLlm {
    file_actions: Mutex<VecDeque<FileWriteProposal>>,
    generic_actions: Mutex<VecDeque<ActionProposal>>,
    chat_replies: Mutex<VecDeque<String>>,
    history_lengths: Mutex<Vec<usize>>,
    hints: Mutex<PromptHints>,
    provider: Mutex<String>,
    calls: AtomicUsize,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            file_actions: Mutex::new(VecDeque::new()),
            generic_actions: Mutex::new(VecDeque::new()),
            chat_replies: Mutex::new(VecDeque::new()),
            history_lengths: Mutex::new(Vec::new()),
            hints: Mutex::new(PromptHints::default()),
            provider: Mutex::new(SCRIPTED_PROVIDERS[0].to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_file_action(self, path: &str, content: &str) -> Self {
        if let Ok(mut queue) = self.file_actions.lock() {
            queue.push_back(FileWriteProposal {
                command: "write_file".to_string(),
                path: path.to_string(),
                content: content.to_string(),
            });
        }
        self
    }

    pub fn with_generic_action(self, action: ActionProposal) -> Self {
        if let Ok(mut queue) = self.generic_actions.lock() {
            queue.push_back(action);
        }
        self
    }

    pub fn with_shell_action(self, command: &str) -> Self {
        self.with_generic_action(ActionProposal::BashCommand {
            description: format!("run {command}"),
            bash_command: command.to_string(),
            working_directory: None,
        })
    }

    pub fn with_chat_reply(self, reply: &str) -> Self {
        if let Ok(mut queue) = self.chat_replies.lock() {
            queue.push_back(reply.to_string());
        }
        self
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// History length passed to each chat call, in order.
    pub fn history_lengths(&self) -> Vec<usize> {
        self.history_lengths
            .lock()
            .map(|lengths| lengths.clone())
            .unwrap_or_default()
    }

    pub fn hints(&self) -> PromptHints {
        self.hints
            .lock()
            .map(|hints| hints.clone())
            .unwrap_or_default()
    }
}

impl LlmBackend for ScriptedLlm {
    fn propose_file_action(&self, _prompt: &str) -> Result<FileWriteProposal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pop(&self.file_actions, "file action")
    }

    fn propose_generic_action(&self, _prompt: &str) -> Result<ActionProposal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pop(&self.generic_actions, "action")
    }

    fn chat_with_history(&self, _prompt: &str, history: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut lengths) = self.history_lengths.lock() {
            lengths.push(history.len());
        }
        pop(&self.chat_replies, "chat reply")
    }

    fn set_provider(&self, name: &str) -> Result<()> {
        let canonical = canonical_provider(name);
        if !SCRIPTED_PROVIDERS.contains(&canonical.as_str()) {
            return Err(ValidationError::single(format!("Unknown provider '{name}'")).into());
        }
        if let Ok(mut provider) = self.provider.lock() {
            *provider = canonical;
        }
        Ok(())
    }

    fn current_provider(&self) -> String {
        self.provider
            .lock()
            .map(|provider| provider.clone())
            .unwrap_or_default()
    }

    fn set_hints(&self, hints: PromptHints) {
        if let Ok(mut current) = self.hints.lock() {
            *current = hints;
        }
    }
}

/// File gateway that records writes instead of touching disk.
#[derive(Debug, Default)]
pub struct RecordingFileGateway {
    writes: Mutex<Vec<(String, String)>>,
    dry_runs: AtomicUsize,
}

impl RecordingFileGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }

    pub fn dry_runs(&self) -> usize {
        self.dry_runs.load(Ordering::SeqCst)
    }
}

impl FileGateway for RecordingFileGateway {
    fn dry_run(&self, path: &str, content: &str) -> Result<DryRunResult> {
        self.dry_runs.fetch_add(1, Ordering::SeqCst);
        Ok(DryRunResult {
            description: format!(
                "[DRY-RUN] Will create new file '{path}' with {} bytes.",
                content.len()
            ),
            success: true,
            error_message: String::new(),
        })
    }

    fn apply(&self, path: &str, content: &str) -> Result<ApplyResult> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((path.to_string(), content.to_string()));
        }
        Ok(ApplyResult {
            description: format!(
                "[APPLIED] Successfully wrote {} bytes to '{path}'.",
                content.len()
            ),
            success: true,
            error_message: String::new(),
            execution_context: ExecutionContext {
                command_output: format!("Created file: {path} ({} bytes)", content.len()),
                ..ExecutionContext::default()
            },
        })
    }
}

/// Shell gateway that records commands; succeeds unless told otherwise.
#[derive(Debug)]
pub struct ScriptedShellGateway {
    root: String,
    commands: Mutex<Vec<String>>,
    failures: Vec<(String, i32, String)>,
    holds: Vec<(String, Mutex<Receiver<()>>)>,
}

impl ScriptedShellGateway {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.display().to_string(),
            commands: Mutex::new(Vec::new()),
            failures: Vec::new(),
            holds: Vec::new(),
        }
    }

    /// Make `command` block until `gate` receives a message or is closed.
    pub fn holding(mut self, command: &str, gate: Receiver<()>) -> Self {
        self.holds.push((command.to_string(), Mutex::new(gate)));
        self
    }

    /// Make `command` exit with `exit_code` and `stderr`.
    pub fn failing(mut self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.failures
            .push((command.to_string(), exit_code, stderr.to_string()));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

impl ShellGateway for ScriptedShellGateway {
    fn execute(&self, command: &str, working_directory: Option<&str>) -> Result<ShellResult> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        if let Some((_, gate)) = self.holds.iter().find(|(held, _)| held == command)
            && let Ok(gate) = gate.lock()
        {
            let _ = gate.recv();
        }
        let cwd = working_directory.map_or_else(|| self.root.clone(), str::to_string);
        let failure = self.failures.iter().find(|(failing, ..)| failing == command);
        let (exit_code, stderr) = failure.map_or((0, String::new()), |(_, code, stderr)| {
            (*code, stderr.clone())
        });
        Ok(ShellResult {
            success: exit_code == 0,
            exit_code,
            stdout: String::new(),
            stderr,
            working_directory_before: cwd.clone(),
            working_directory_after: cwd,
            timed_out: false,
            timestamp_ms: 0,
        })
    }

    fn current_directory(&self) -> Result<String> {
        Ok(self.root.clone())
    }
}

/// Confirmation fake answering from a queue; answers `No` once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<Answer>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answers: &[Answer]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions
            .lock()
            .map(|questions| questions.clone())
            .unwrap_or_default()
    }
}

impl Confirm for ScriptedConfirm {
    fn ask(&self, question: &str) -> Result<Answer> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_string());
        }
        Ok(self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(Answer::No))
    }
}

/// Session over the scripted collaborators.
pub type ScriptedSession = Session<ScriptedLlm, RecordingFileGateway, ScriptedShellGateway>;

/// Temporary project directory; removed on drop.
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp project")?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Open a session with default config and a shell gateway that always succeeds.
    pub fn session(&self, llm: ScriptedLlm) -> Result<ScriptedSession> {
        self.session_with_shell(llm, ScriptedShellGateway::new(self.root()))
    }

    pub fn session_with_shell(
        &self,
        llm: ScriptedLlm,
        shell: ScriptedShellGateway,
    ) -> Result<ScriptedSession> {
        Session::open(
            self.root(),
            AppConfig::default(),
            llm,
            RecordingFileGateway::new(),
            shell,
        )
    }
}
