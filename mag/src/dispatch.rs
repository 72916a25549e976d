//! Task dispatcher: routes a todo to the shell or file backend.
//!
//! Shell tasks obtain their command from the LLM (or keyword heuristics),
//! pass the command policy and run through the shell gateway. File tasks ask
//! the LLM for a write, pass the path and size policy, then dry-run and apply
//! through the file gateway. Any failure is returned to the caller, which
//! decides whether the batch continues.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{TaskKind, classify, extract_with_rule};
use crate::core::policy::{FILE_TOOL, Operation};
use crate::core::todo::Task;
use crate::core::types::{ActionProposal, ApplyResult, DryRunResult, ExecutionContext, ShellResult};
use crate::error::CommunicationError;
use crate::io::config::CommandExtraction;
use crate::io::file_gateway::FileGateway;
use crate::io::llm::LlmBackend;
use crate::io::shell_gateway::ShellGateway;
use crate::policy::PolicyEngine;

/// What a successfully executed task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub kind: TaskKind,
    /// Command run or gateway description of the write.
    pub summary: String,
    pub context: ExecutionContext,
}

/// Executes one task to completion or failure.
pub trait TaskExecutor {
    fn execute_single(&self, task: &Task) -> Result<TaskOutcome>;
}

impl<F> TaskExecutor for F
where
    F: Fn(&Task) -> Result<TaskOutcome>,
{
    fn execute_single(&self, task: &Task) -> Result<TaskOutcome> {
        self(task)
    }
}

/// Production executor wiring the LLM, both gateways and the policy engine.
#[derive(Debug)]
pub struct Dispatcher<L, F, S> {
    llm: L,
    files: F,
    shell: S,
    policy: Arc<PolicyEngine>,
    extraction: CommandExtraction,
}

impl<L, F, S> Dispatcher<L, F, S>
where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
{
    pub fn new(
        llm: L,
        files: F,
        shell: S,
        policy: Arc<PolicyEngine>,
        extraction: CommandExtraction,
    ) -> Self {
        Self {
            llm,
            files,
            shell,
            policy,
            extraction,
        }
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    pub fn files(&self) -> &F {
        &self.files
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// UPDATE when the target already exists, CREATE otherwise.
    pub fn file_operation(&self, path: &str) -> Operation {
        let target = Path::new(path);
        let exists = if target.is_absolute() {
            target.exists()
        } else {
            self.policy.root().join(target).exists()
        };
        if exists {
            Operation::Update
        } else {
            Operation::Create
        }
    }

    /// Policy checks plus gateway dry run; nothing is written.
    pub fn preview_file_write(&self, path: &str, content: &str) -> Result<(Operation, DryRunResult)> {
        if path.trim().is_empty() {
            return Err(anyhow!("No file path provided"));
        }
        let op = self.file_operation(path);
        self.policy.check_path(FILE_TOOL, op, path)?;
        self.policy.check_file_size(path, content.len() as u64)?;
        let dry_run = self
            .files
            .dry_run(path, content)
            .map_err(|err| CommunicationError::new("file gateway", format!("{err:#}")))?;
        if !dry_run.success {
            return Err(anyhow!("Dry run failed: {}", dry_run.error_message));
        }
        Ok((op, dry_run))
    }

    /// Apply a previewed write. Fails if the gateway reports failure.
    pub fn commit_file_write(&self, path: &str, content: &str) -> Result<ApplyResult> {
        let applied = self
            .files
            .apply(path, content)
            .map_err(|err| CommunicationError::new("file gateway", format!("{err:#}")))?;
        if !applied.success {
            return Err(anyhow!("{}", applied.error_message));
        }
        info!(path, bytes = content.len(), "file written");
        Ok(applied)
    }

    /// Policy-check and run a shell command. A nonzero exit is an error.
    pub fn run_shell_command(
        &self,
        command: &str,
        working_directory: Option<&str>,
    ) -> Result<ShellResult> {
        self.policy.check_command(command)?;
        let result = self
            .shell
            .execute(command, working_directory)
            .map_err(|err| CommunicationError::new("shell gateway", format!("{err:#}")))?;
        if !result.success {
            let stderr = result.stderr.trim();
            return Err(if stderr.is_empty() {
                anyhow!("Shell command failed with exit code {}", result.exit_code)
            } else {
                anyhow!(
                    "Shell command failed with exit code {}: {stderr}",
                    result.exit_code
                )
            });
        }
        Ok(result)
    }

    /// Concrete command for shell-classified task text.
    pub fn shell_command_for(&self, prompt: &str) -> String {
        if self.extraction == CommandExtraction::Llm {
            match self.llm.propose_generic_action(prompt) {
                Ok(ActionProposal::BashCommand { bash_command, .. })
                    if !bash_command.trim().is_empty() =>
                {
                    debug!(command = %bash_command, "llm supplied command");
                    return bash_command.trim().to_string();
                }
                Ok(_) => warn!("llm proposed a non-shell action for a shell task"),
                Err(err) => warn!(err = %err, "llm command extraction failed"),
            }
        }
        let (rule, command) = extract_with_rule(prompt);
        debug!(rule, command = %command, "heuristic command extraction");
        command
    }

    fn execute_shell_task(&self, prompt: &str) -> Result<TaskOutcome> {
        let command = self.shell_command_for(prompt);
        if command.trim().is_empty() {
            return Err(anyhow!("Could not determine shell command from: {prompt}"));
        }
        let result = self.run_shell_command(&command, None)?;
        Ok(TaskOutcome {
            kind: TaskKind::Shell,
            summary: command,
            context: result.execution_context(),
        })
    }

    fn execute_file_task(&self, prompt: &str) -> Result<TaskOutcome> {
        let proposal = self.llm.propose_file_action(prompt)?;
        let path = proposal.path.trim();
        if path.is_empty() {
            return Err(CommunicationError::new("llm", "LLM did not provide a valid file path").into());
        }
        let (_, dry_run) = self.preview_file_write(path, &proposal.content)?;
        debug!(description = %dry_run.description, "dry run passed");
        let applied = self.commit_file_write(path, &proposal.content)?;
        Ok(TaskOutcome {
            kind: TaskKind::File,
            summary: applied.description,
            context: applied.execution_context,
        })
    }
}

impl<L, F, S> TaskExecutor for Dispatcher<L, F, S>
where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
{
    #[instrument(skip_all, fields(todo_id = task.id))]
    fn execute_single(&self, task: &Task) -> Result<TaskOutcome> {
        let prompt = task.prompt_text();
        let kind = classify(&prompt);
        info!(kind = ?kind, prompt = %prompt, "dispatching task");
        match kind {
            TaskKind::Shell => self.execute_shell_task(&prompt),
            TaskKind::File => self.execute_file_task(&prompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::PolicySettings;
    use crate::core::todo::TodoStore;
    use crate::error::PolicyViolation;
    use crate::test_support::{RecordingFileGateway, ScriptedLlm, ScriptedShellGateway};

    type TestDispatcher = Dispatcher<ScriptedLlm, RecordingFileGateway, ScriptedShellGateway>;

    fn dispatcher(root: &Path, llm: ScriptedLlm, extraction: CommandExtraction) -> TestDispatcher {
        let policy = Arc::new(PolicyEngine::new(PolicySettings::default(), root).expect("policy"));
        Dispatcher::new(
            llm,
            RecordingFileGateway::new(),
            ScriptedShellGateway::new(root),
            policy,
            extraction,
        )
    }

    fn task(title: &str, description: &str) -> Task {
        let mut store = TodoStore::new();
        let id = store.add(title, description).expect("add");
        store.get(id).cloned().expect("task")
    }

    /// File tasks go LLM → policy → dry run → apply.
    #[test]
    fn file_task_writes_through_gateway() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = ScriptedLlm::new().with_file_action("src/hello.py", "print('hello')\n");
        let dispatcher = dispatcher(temp.path(), llm, CommandExtraction::Heuristic);

        let outcome = dispatcher
            .execute_single(&task("Create hello world", "Python script"))
            .expect("execute");
        assert_eq!(outcome.kind, TaskKind::File);
        assert_eq!(
            dispatcher.files().writes(),
            vec![("src/hello.py".to_string(), "print('hello')\n".to_string())]
        );
        assert_eq!(dispatcher.files().dry_runs(), 1);
    }

    /// A denied path never reaches the gateway.
    #[test]
    fn file_task_denied_by_policy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = ScriptedLlm::new().with_file_action("../outside.py", "x");
        let dispatcher = dispatcher(temp.path(), llm, CommandExtraction::Heuristic);

        let err = dispatcher
            .execute_single(&task("Create helper", ""))
            .expect_err("denied");
        assert!(err.downcast_ref::<PolicyViolation>().is_some());
        assert!(dispatcher.files().writes().is_empty());
        assert_eq!(dispatcher.files().dry_runs(), 0);
    }

    /// An empty proposed path is a communication failure.
    #[test]
    fn empty_path_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = ScriptedLlm::new().with_file_action("  ", "x");
        let dispatcher = dispatcher(temp.path(), llm, CommandExtraction::Heuristic);
        let err = dispatcher
            .execute_single(&task("Create helper", ""))
            .expect_err("empty path");
        assert!(err.downcast_ref::<CommunicationError>().is_some());
    }

    /// Existing targets are checked against the update allow-list.
    #[test]
    fn existing_file_uses_update_operation() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
        std::fs::write(temp.path().join("docs/guide.md"), "old").expect("write");
        let llm = ScriptedLlm::new();
        let dispatcher = dispatcher(temp.path(), llm, CommandExtraction::Heuristic);

        assert_eq!(dispatcher.file_operation("docs/guide.md"), Operation::Update);
        assert_eq!(dispatcher.file_operation("docs/new.md"), Operation::Create);
        // docs/ allows create but not update.
        assert!(dispatcher.preview_file_write("docs/guide.md", "new").is_err());
        assert!(dispatcher.preview_file_write("docs/new.md", "new").is_ok());
    }

    /// Heuristic mode extracts the command without consulting the LLM.
    #[test]
    fn shell_task_heuristic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(temp.path(), ScriptedLlm::new(), CommandExtraction::Heuristic);

        let outcome = dispatcher
            .execute_single(&task("Test it", ""))
            .expect("execute");
        assert_eq!(outcome.kind, TaskKind::Shell);
        assert_eq!(dispatcher.shell().commands(), vec!["make test".to_string()]);
        assert_eq!(dispatcher.llm().calls(), 0);
    }

    /// LLM mode prefers the proposed command, falling back on failure.
    #[test]
    fn shell_task_llm_extraction() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = ScriptedLlm::new().with_shell_action("python3 src/count.py");
        let dispatcher = dispatcher(temp.path(), llm, CommandExtraction::Llm);
        dispatcher
            .execute_single(&task("Run the counter", ""))
            .expect("execute");
        assert_eq!(
            dispatcher.shell().commands(),
            vec!["python3 src/count.py".to_string()]
        );

        let fallback = dispatcher
            .execute_single(&task("Build it", ""))
            .expect("fallback");
        assert_eq!(fallback.summary, "make");
    }

    /// Blocked commands are refused before execution.
    #[test]
    fn blocked_command_not_executed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(temp.path(), ScriptedLlm::new(), CommandExtraction::Heuristic);
        let err = dispatcher
            .execute_single(&task("run curl example.com", ""))
            .expect_err("blocked");
        let violation = err.downcast_ref::<PolicyViolation>().expect("typed");
        assert_eq!(violation.reason, "Command contains blocked operation 'curl'");
        assert!(dispatcher.shell().commands().is_empty());
    }

    /// Nonzero exit codes fail the task with stderr attached.
    #[test]
    fn failing_command_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut dispatcher =
            dispatcher(temp.path(), ScriptedLlm::new(), CommandExtraction::Heuristic);
        dispatcher.shell = ScriptedShellGateway::new(temp.path()).failing("make", 2, "no rule");
        let err = dispatcher
            .execute_single(&task("Build it", "make"))
            .expect_err("failure");
        assert_eq!(
            err.to_string(),
            "Shell command failed with exit code 2: no rule"
        );
    }

    /// Closures are executors too.
    #[test]
    fn closure_executor() {
        let executor = |task: &Task| -> Result<TaskOutcome> {
            Ok(TaskOutcome {
                kind: TaskKind::File,
                summary: task.title.clone(),
                context: ExecutionContext::default(),
            })
        };
        let outcome = executor.execute_single(&task("x", "")).expect("run");
        assert_eq!(outcome.summary, "x");
    }
}
