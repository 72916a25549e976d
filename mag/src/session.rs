//! Coordinator session: the object every front-end drives.
//!
//! A session owns the todo store (persisted after every change), the
//! dispatcher with its collaborators, the execution state machine and the
//! chat history. All methods take `&self`, so one thread can run a batch
//! while another issues pause/resume/stop/cancel and reads the status.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::controller::{BatchOutcome, BatchStop, ExecutionController, Observer, TaskEvent, TaskRun};
use crate::core::control::{ControlCommand, DoTarget};
use crate::core::directive::render_todo_list;
use crate::core::execution_state::{ExecutionControl, ExecutionState, Transition};
use crate::core::policy::{BASH_TOOL, FILE_TOOL, Operation, PolicySettings};
use crate::core::todo::{Task, TaskUpdate, TodoStore};
use crate::core::types::{ActionProposal, ApplyResult, ChatMessage, ShellResult};
use crate::directives::{DirectiveOutcome, apply_directives};
use crate::dispatch::Dispatcher;
use crate::error::{CommunicationError, ValidationError};
use crate::io::config::{AppConfig, ProjectPaths, load_config};
use crate::io::file_gateway::{FileGateway, LocalFileGateway};
use crate::io::llm::{CommandLlmBackend, LlmBackend};
use crate::io::shell_gateway::{LocalShellGateway, ShellGateway};
use crate::io::todo_store::{load_todos, write_todos};
use crate::policy::PolicyEngine;

/// Reply to a confirmation question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// Yes, and stop asking for the rest of the session.
    Always,
}

/// Asks the user before an action whose policy requires confirmation.
pub trait Confirm {
    fn ask(&self, question: &str) -> Result<Answer>;
}

/// Approves everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Confirm for AutoApprove {
    fn ask(&self, _question: &str) -> Result<Answer> {
        Ok(Answer::Yes)
    }
}

/// Result of a single interactive action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReport {
    FileWritten { preview: String, result: ApplyResult },
    CommandRan { command: String, result: ShellResult },
    Declined { preview: String },
}

impl ActionReport {
    /// False for declined actions and failed commands.
    pub fn succeeded(&self) -> bool {
        match self {
            ActionReport::FileWritten { result, .. } => result.success,
            ActionReport::CommandRan { result, .. } => result.success,
            ActionReport::Declined { .. } => false,
        }
    }
}

impl fmt::Display for ActionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionReport::FileWritten { preview, result } => {
                writeln!(f, "{preview}")?;
                writeln!(f, "{}", result.description)?;
                write!(f, "{}", result.execution_context.combined_output())
            }
            ActionReport::CommandRan { command, result } => {
                let context = result.execution_context();
                writeln!(f, "$ {command}")?;
                let output = context.combined_output();
                if !output.is_empty() {
                    writeln!(f, "{}", output.trim_end())?;
                }
                write!(f, "Exit code: {}", result.exit_code)?;
                if context.directory_changed() {
                    write!(
                        f,
                        "\nWorking directory: {} -> {}",
                        context.working_directory_before, context.working_directory_after
                    )?;
                }
                Ok(())
            }
            ActionReport::Declined { .. } => f.write_str("Operation cancelled by user."),
        }
    }
}

/// Summary of a `/do` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub message: String,
    pub failed: usize,
}

/// Snapshot for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ExecutionState,
    pub pending: usize,
    pub completed: usize,
    pub provider: String,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Execution state: {}\nPending todos: {}\nCompleted todos: {}\nProvider: {}",
            self.state, self.pending, self.completed, self.provider
        )
    }
}

/// Session over the production LLM command and local gateways.
pub type LocalSession = Session<CommandLlmBackend, LocalFileGateway, LocalShellGateway>;

impl LocalSession {
    /// Load `.mag/config.toml` under `root` and wire the local collaborators.
    pub fn open_local(root: &Path) -> Result<Self> {
        let paths = ProjectPaths::new(root);
        let config = load_config(&paths.config_path)?;
        let llm = CommandLlmBackend::new(
            &config.llm,
            root,
            config.llm_timeout(),
            config.output_limit_bytes,
        );
        let files = LocalFileGateway::new(root);
        let shell = LocalShellGateway::new(root, config.shell_timeout(), config.output_limit_bytes);
        Self::open(root, config, llm, files, shell)
    }
}

pub struct Session<L, F, S> {
    config: AppConfig,
    todos_path: PathBuf,
    dispatcher: Dispatcher<L, F, S>,
    control: ExecutionControl,
    store: Mutex<TodoStore>,
    history: Mutex<Vec<ChatMessage>>,
    always_approve: AtomicBool,
    pending: AtomicUsize,
    completed: AtomicUsize,
}

impl<L, F, S> Session<L, F, S>
where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
{
    /// Load the policy (fatal if present but invalid) and the todo store.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn open(root: &Path, config: AppConfig, llm: L, files: F, shell: S) -> Result<Self> {
        config.validate()?;
        let paths = ProjectPaths::new(root);
        let policy = Arc::new(PolicyEngine::load(root, &paths.resolve(&config.policy_path))?);
        llm.set_hints(policy.prompt_hints());

        let todos_path = paths.resolve(&config.todos_path);
        let store = load_todos(&todos_path)?;
        let dispatcher = Dispatcher::new(llm, files, shell, policy, config.command_extraction);
        info!(pending = store.count_pending(), "session opened");
        Ok(Self {
            todos_path,
            dispatcher,
            control: ExecutionControl::new(),
            history: Mutex::new(Vec::new()),
            always_approve: AtomicBool::new(false),
            pending: AtomicUsize::new(store.count_pending()),
            completed: AtomicUsize::new(store.get_completed().len()),
            store: Mutex::new(store),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyEngine {
        self.dispatcher.policy()
    }

    pub fn dispatcher(&self) -> &Dispatcher<L, F, S> {
        &self.dispatcher
    }

    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    /// Replace the policy and refresh the hints rendered into prompts.
    pub fn update_policy(&self, settings: PolicySettings) -> Result<()> {
        self.policy().update_settings(settings)?;
        self.dispatcher.llm().set_hints(self.policy().prompt_hints());
        Ok(())
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, TodoStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow!("todo store lock poisoned"))
    }

    fn update_counts(&self, store: &TodoStore) {
        self.pending.store(store.count_pending(), Ordering::SeqCst);
        self.completed
            .store(store.get_completed().len(), Ordering::SeqCst);
    }

    fn persist(&self, store: &TodoStore) -> Result<()> {
        self.update_counts(store);
        write_todos(&self.todos_path, store)
    }

    /// Read-only access to the store.
    pub fn read_store<T>(&self, f: impl FnOnce(&TodoStore) -> T) -> Result<T> {
        let store = self.lock_store()?;
        Ok(f(&store))
    }

    /// Mutate the store and persist it if `f` succeeds.
    pub fn with_store<T>(&self, f: impl FnOnce(&mut TodoStore) -> Result<T>) -> Result<T> {
        let mut store = self.lock_store()?;
        let value = f(&mut store)?;
        self.persist(&store)?;
        Ok(value)
    }

    pub fn add_todo(&self, title: &str, description: &str) -> Result<u64> {
        let id = self.with_store(|store| store.add(title, description))?;
        info!(todo_id = id, title, "todo added");
        Ok(id)
    }

    pub fn list_todos(&self, include_completed: bool) -> Result<Vec<Task>> {
        self.read_store(|store| store.list(include_completed).into_iter().cloned().collect())
    }

    pub fn complete_todo(&self, id: u64) -> Result<()> {
        self.with_store(|store| {
            if store.get(id).is_none() {
                return Err(ValidationError::single(format!("Todo {id} not found")).into());
            }
            store.mark_completed(id);
            Ok(())
        })
    }

    /// Returns false when nothing changed.
    pub fn update_todo(&self, id: u64, update: TaskUpdate) -> Result<bool> {
        self.with_store(|store| {
            if store.get(id).is_none() {
                return Err(ValidationError::single(format!("Todo {id} not found")).into());
            }
            Ok(store.update(id, update))
        })
    }

    pub fn delete_todo(&self, id: u64) -> Result<()> {
        self.with_store(|store| {
            if store.delete(id) {
                Ok(())
            } else {
                Err(ValidationError::single(format!("Todo {id} not found")).into())
            }
        })
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            state: self.control.state(),
            pending: self.pending.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            provider: self.dispatcher.llm().current_provider(),
        }
    }

    pub fn pause(&self) -> Transition {
        self.control.pause()
    }

    pub fn resume(&self) -> Transition {
        self.control.resume()
    }

    pub fn stop(&self) -> Transition {
        self.control.stop()
    }

    pub fn cancel(&self) -> Transition {
        self.control.cancel()
    }

    /// Switch provider; returns the canonical name now in use.
    pub fn set_provider(&self, name: &str) -> Result<String> {
        self.dispatcher.llm().set_provider(name)?;
        Ok(self.dispatcher.llm().current_provider())
    }

    /// Run the todos selected by `target`, persisting after every transition.
    #[instrument(skip_all, fields(target = ?target))]
    pub fn execute(&self, target: DoTarget, observer: Observer<'_>) -> Result<ExecutionReport> {
        let mut store = self.lock_store()?;
        let controller = ExecutionController::new(
            &self.dispatcher,
            &self.control,
            self.config.pause_poll_interval(),
        );
        let mut forward = |event: &TaskEvent<'_>, store: &TodoStore| {
            if let Err(err) = self.persist(store) {
                warn!(err = %err, "failed to persist todos");
            }
            observer(event, store);
        };

        let report = match target {
            DoTarget::All => {
                let batch = controller.execute_all_pending(&mut store, &mut forward)?;
                batch_report(&batch, || match batch.stop {
                    BatchStop::Stopped => "Execution interrupted".to_string(),
                    BatchStop::Cancelled => "Execution cancelled".to_string(),
                    _ => "Todo execution complete".to_string(),
                })
                .unwrap_or_else(no_pending)
            }
            DoTarget::Next => controller
                .execute_next(&mut store, &mut forward)
                .map_or_else(no_pending, |run| run_report(&run)),
            DoTarget::Until(stop_id) => {
                let batch = controller.execute_until(&mut store, stop_id, &mut forward);
                batch_report(&batch, || format!("Execution stopped before ID {stop_id}"))
                    .unwrap_or_else(|| ExecutionReport {
                        message: format!("No todos to execute until ID {stop_id}."),
                        failed: 0,
                    })
            }
            DoTarget::Range(start_id, end_id) => {
                let batch = controller.execute_range(&mut store, start_id, end_id, &mut forward);
                batch_report(&batch, || "Range execution complete".to_string()).unwrap_or_else(
                    || ExecutionReport {
                        message: format!("No todos found in range [{start_id}, {end_id}]."),
                        failed: 0,
                    },
                )
            }
            DoTarget::Single(id) => {
                let run = controller.execute_by_id(&mut store, id, &mut forward)?;
                run_report(&run)
            }
        };
        self.persist(&store)?;
        debug!(failed = report.failed, "execution request finished");
        Ok(report)
    }

    /// Chat turn: ask the LLM with history, then apply any directives in the reply.
    #[instrument(skip_all)]
    pub fn chat(&self, prompt: &str, observer: Observer<'_>) -> Result<DirectiveOutcome> {
        let history = self
            .history
            .lock()
            .map(|history| history.clone())
            .map_err(|_| anyhow!("chat history lock poisoned"))?;
        let reply = self.dispatcher.llm().chat_with_history(prompt, &history)?;

        let outcome = {
            let mut store = self.lock_store()?;
            let controller = ExecutionController::new(
                &self.dispatcher,
                &self.control,
                self.config.pause_poll_interval(),
            );
            let mut forward = |event: &TaskEvent<'_>, store: &TodoStore| {
                if let Err(err) = self.persist(store) {
                    warn!(err = %err, "failed to persist todos");
                }
                observer(event, store);
            };
            let outcome = apply_directives(&reply, &mut store, &controller, &mut forward);
            if outcome.mutated {
                self.persist(&store)?;
            }
            outcome
        };

        let mut history = self
            .history
            .lock()
            .map_err(|_| anyhow!("chat history lock poisoned"))?;
        history.push(ChatMessage::user(prompt));
        history.push(ChatMessage::assistant(outcome.text.clone()));
        Ok(outcome)
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Ask the LLM for one action, check it, confirm if required, then apply it.
    #[instrument(skip_all)]
    pub fn run_action(&self, prompt: &str, confirm: &dyn Confirm) -> Result<ActionReport> {
        let proposal = self.dispatcher.llm().propose_generic_action(prompt)?;
        info!(description = %proposal.description(), "llm proposed action");
        match proposal {
            ActionProposal::FileWrite {
                file_path,
                file_content,
                ..
            } => {
                let (op, dry_run) = self
                    .dispatcher
                    .preview_file_write(&file_path, &file_content)?;
                if self.policy().confirmation_required(FILE_TOOL, op)
                    && !self.confirmed(confirm, &dry_run.description)?
                {
                    return Ok(ActionReport::Declined {
                        preview: dry_run.description,
                    });
                }
                let result = self
                    .dispatcher
                    .commit_file_write(&file_path, &file_content)?;
                Ok(ActionReport::FileWritten {
                    preview: dry_run.description,
                    result,
                })
            }
            ActionProposal::BashCommand {
                bash_command,
                working_directory,
                ..
            } => {
                self.policy().check_command(&bash_command)?;
                let question = format!("Run command: {bash_command}");
                if self
                    .policy()
                    .confirmation_required(BASH_TOOL, Operation::Create)
                    && !self.confirmed(confirm, &question)?
                {
                    return Ok(ActionReport::Declined { preview: question });
                }
                let result = self
                    .dispatcher
                    .shell()
                    .execute(&bash_command, working_directory.as_deref())
                    .map_err(|err| CommunicationError::new("shell gateway", format!("{err:#}")))?;
                Ok(ActionReport::CommandRan {
                    command: bash_command,
                    result,
                })
            }
        }
    }

    fn confirmed(&self, confirm: &dyn Confirm, question: &str) -> Result<bool> {
        if self.always_approve.load(Ordering::SeqCst) {
            return Ok(true);
        }
        match confirm.ask(question).context("ask for confirmation")? {
            Answer::Yes => Ok(true),
            Answer::No => Ok(false),
            Answer::Always => {
                info!("always-approve enabled for this session");
                self.always_approve.store(true, Ordering::SeqCst);
                Ok(true)
            }
        }
    }

    /// Run a parsed slash command and return the text to show.
    pub fn handle_control_command(
        &self,
        command: ControlCommand,
        confirm: &dyn Confirm,
        observer: Observer<'_>,
    ) -> Result<String> {
        let text = match command {
            ControlCommand::Do(target) => self.execute(target, observer)?.message,
            ControlCommand::Pause => self.pause().to_string(),
            ControlCommand::Resume => self.resume().to_string(),
            ControlCommand::Stop => self.stop().to_string(),
            ControlCommand::Cancel => self.cancel().to_string(),
            ControlCommand::Status => self.status().to_string(),
            ControlCommand::Todo => self
                .read_store(|store| render_todo_list(&store.list(true)))?
                .trim()
                .to_string(),
            ControlCommand::Provider(name) => {
                format!("Switched to provider: {}", self.set_provider(&name)?)
            }
            ControlCommand::Act(prompt) => self.run_action(&prompt, confirm)?.to_string(),
        };
        Ok(text)
    }
}

fn no_pending() -> ExecutionReport {
    ExecutionReport {
        message: "No pending todos to execute.".to_string(),
        failed: 0,
    }
}

fn run_report(run: &TaskRun) -> ExecutionReport {
    match &run.outcome {
        Ok(_) => ExecutionReport {
            message: format!("Completed: {}", run.task.title),
            failed: 0,
        },
        Err(err) => ExecutionReport {
            message: format!("Failed: {} - {err}", run.task.title),
            failed: 1,
        },
    }
}

/// `None` when the batch selected nothing.
fn batch_report(batch: &BatchOutcome, headline: impl FnOnce() -> String) -> Option<ExecutionReport> {
    if batch.stop == BatchStop::Empty {
        return None;
    }
    let mut message = format!(
        "{}: {} succeeded, {} failed",
        headline(),
        batch.succeeded(),
        batch.failed()
    );
    if batch.skipped > 0 {
        message.push_str(&format!(", {} left pending", batch.skipped));
    }
    if batch.stop == BatchStop::Halted {
        message.push_str(" (halted after failure)");
    }
    message.push('.');
    Some(ExecutionReport {
        message,
        failed: batch.failed(),
    })
}
