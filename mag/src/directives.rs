//! Directive substitution: applies directives found in chat text to the todo
//! store and replaces each with a short confirmation or error string.
//!
//! Directives run phase by phase (adds, blocks, list, complete, delete,
//! execute next, execute all, execute by id, approvals) and in text order
//! within a phase. A bad directive never aborts the pass; it degrades to an
//! inline `**Error:**` string. Directive names inside replacement text (titles,
//! descriptions, error messages) are defused, so a second pass over the output
//! changes nothing.

use tracing::{debug, info};

use crate::controller::{ExecutionController, Observer, TaskRun};
use crate::core::directive::{
    Directive, Span, approval_message, defuse, render_todo_list, tokenize,
};
use crate::core::todo::{TaskStatus, TodoStore};
use crate::dispatch::TaskExecutor;

const LAST_PHASE: u8 = 8;

/// Result of one substitution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveOutcome {
    /// Text with every recognized directive replaced.
    pub text: String,
    /// Side-channel log lines (`[TODO] ...`, `[EXECUTE] ...`, `[APPROVAL REQUESTED] ...`).
    pub log: Vec<String>,
    /// Reasons from `request_user_approval` directives.
    pub approvals: Vec<String>,
    /// Reminder about remaining pending todos, when anything happened.
    pub suggestion: Option<String>,
    /// True when the store was changed.
    pub mutated: bool,
}

/// Apply every directive in `text` and return the rewritten text.
pub fn apply_directives<E: TaskExecutor>(
    text: &str,
    store: &mut TodoStore,
    controller: &ExecutionController<'_, E>,
    observer: Observer<'_>,
) -> DirectiveOutcome {
    let spans = tokenize(text);
    let mut replacements: Vec<Option<String>> = vec![None; spans.len()];
    let mut pass = Pass {
        store,
        controller,
        observer,
        log: Vec::new(),
        approvals: Vec::new(),
        mutated: false,
        todo_list: None,
    };

    for phase in 0..=LAST_PHASE {
        for (index, span) in spans.iter().enumerate() {
            if let Span::Directive { directive, .. } = span
                && directive.phase() == phase
            {
                replacements[index] = Some(defuse(&pass.apply(directive)).into_owned());
            }
        }
    }

    let mut rewritten = String::with_capacity(text.len());
    for (span, replacement) in spans.iter().zip(replacements) {
        match (span, replacement) {
            (_, Some(replacement)) => rewritten.push_str(&replacement),
            (Span::Literal(literal), None) => rewritten.push_str(literal),
            (Span::Directive { raw, .. }, None) => rewritten.push_str(raw),
        }
    }

    let suggestion = if pass.log.is_empty() {
        None
    } else {
        match pass.store.count_pending() {
            0 => None,
            pending => Some(format!(
                "💡 Suggestion: You have {pending} pending todo(s). Use '/do next' to execute \
                 the next one, or '/do all' to execute all pending todos."
            )),
        }
    };
    debug!(
        directives = spans
            .iter()
            .filter(|span| matches!(span, Span::Directive { .. }))
            .count(),
        mutated = pass.mutated,
        "directive pass complete"
    );

    DirectiveOutcome {
        text: rewritten,
        log: pass.log,
        approvals: pass.approvals,
        suggestion,
        mutated: pass.mutated,
    }
}

struct Pass<'p, 'c, 'o, E> {
    store: &'p mut TodoStore,
    controller: &'p ExecutionController<'c, E>,
    observer: Observer<'o>,
    log: Vec<String>,
    approvals: Vec<String>,
    mutated: bool,
    /// Rendered once, shared by every `list_todos()` occurrence.
    todo_list: Option<String>,
}

impl<E: TaskExecutor> Pass<'_, '_, '_, E> {
    fn apply(&mut self, directive: &Directive) -> String {
        match directive {
            Directive::AddTodo { title, description }
            | Directive::AddTodoBlock { title, description } => self.add(title, description),
            Directive::ListTodos => self
                .todo_list
                .get_or_insert_with(|| render_todo_list(&self.store.list(true)))
                .clone(),
            Directive::MarkComplete(id) => {
                if self.store.get(*id).is_none() {
                    return not_found(*id);
                }
                self.store.mark_completed(*id);
                self.record(format!("[TODO] Completed: ID {id}"));
                format!("**Completed:** Todo {id}")
            }
            Directive::DeleteTodo(id) => {
                if !self.store.delete(*id) {
                    return not_found(*id);
                }
                self.record(format!("[TODO] Deleted: ID {id}"));
                format!("**Deleted:** Todo {id}")
            }
            Directive::ExecuteNext => {
                match self.controller.execute_next(self.store, self.observer) {
                    Some(run) => self.report_run(&run),
                    None => "**No pending todos to execute**".to_string(),
                }
            }
            Directive::ExecuteAll => self.execute_all(),
            Directive::ExecuteTodo(id) => {
                let pending = self
                    .store
                    .get(*id)
                    .is_some_and(|task| task.status == TaskStatus::Pending);
                if !pending {
                    return format!("**Error:** Todo {id} not found or not pending");
                }
                match self.controller.execute_by_id(self.store, *id, self.observer) {
                    Ok(run) => self.report_run(&run),
                    Err(err) => format!("**Error:** {err}"),
                }
            }
            Directive::RequestApproval { reason } => {
                info!(reason = %reason, "llm requested user approval");
                self.log.push(format!("[APPROVAL REQUESTED] {reason}"));
                self.approvals.push(reason.clone());
                approval_message(reason)
            }
        }
    }

    fn add(&mut self, title: &str, description: &str) -> String {
        match self.store.add(title, description) {
            Ok(id) => {
                self.record(format!("[TODO] Added: {title} (ID: {id})"));
                format!("**Added:** {title}")
            }
            Err(err) => format!("**Error:** {err}"),
        }
    }

    fn execute_all(&mut self) -> String {
        match self
            .controller
            .execute_all_pending(self.store, self.observer)
        {
            Ok(batch) => {
                for run in &batch.runs {
                    self.log_run(run);
                }
                let failed = batch.failed();
                if failed == 0 {
                    format!("**Executed {} pending todos**", batch.succeeded())
                } else {
                    format!(
                        "**Executed {} pending todos** ({failed} failed)",
                        batch.succeeded()
                    )
                }
            }
            Err(err) => format!("**Error:** {err}"),
        }
    }

    fn report_run(&mut self, run: &TaskRun) -> String {
        self.log_run(run);
        match &run.outcome {
            Ok(_) => format!("**Executed:** {}", run.task.title),
            Err(err) => format!("**Failed:** {} - {err}", run.task.title),
        }
    }

    fn log_run(&mut self, run: &TaskRun) {
        let line = match &run.outcome {
            Ok(_) => format!(
                "[EXECUTE] Completed: {} (ID: {})",
                run.task.title, run.task.id
            ),
            Err(err) => format!(
                "[EXECUTE] Failed: {} (ID: {}): {err}",
                run.task.title, run.task.id
            ),
        };
        self.record(line);
    }

    fn record(&mut self, line: String) {
        debug!(line = %line, "directive applied");
        self.log.push(line);
        self.mutated = true;
    }
}

fn not_found(id: u64) -> String {
    format!("**Error:** Todo {id} not found")
}
