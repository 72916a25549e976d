//! Execution controller: runs pending todos through a [`TaskExecutor`].
//!
//! `execute_all_pending` is the only entry point that drives the
//! [`ExecutionControl`] state machine; it keeps going past a failed task.
//! The until/range variants halt on the first failure. Single-task entry
//! points run synchronously and ignore batch state.
//!
//! A failed task is returned to PENDING so it can be retried.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::execution_state::{ExecutionControl, ExecutionState};
use crate::core::todo::{Task, TaskStatus, TodoStore};
use crate::dispatch::{TaskExecutor, TaskOutcome};
use crate::error::ValidationError;

/// Progress notifications, delivered with the store in its post-event state.
#[derive(Debug)]
pub enum TaskEvent<'a> {
    Started(&'a Task),
    Completed(&'a Task, &'a TaskOutcome),
    Failed(&'a Task, &'a anyhow::Error),
}

/// Callback receiving every [`TaskEvent`] of a run.
pub type Observer<'o> = &'o mut dyn FnMut(&TaskEvent<'_>, &TodoStore);

/// One executed task.
#[derive(Debug)]
pub struct TaskRun {
    pub task: Task,
    pub outcome: Result<TaskOutcome>,
}

impl TaskRun {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Why a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStop {
    /// Every selected task was attempted.
    Finished,
    /// Nothing was selected.
    Empty,
    /// A stop request ended the batch; remaining tasks stay pending.
    Stopped,
    /// A cancel request ended the batch; remaining tasks stay pending.
    Cancelled,
    /// Until/range mode hit a failure and skipped the rest.
    Halted,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub runs: Vec<TaskRun>,
    pub stop: BatchStop,
    /// Tasks selected but never started.
    pub skipped: usize,
}

impl BatchOutcome {
    fn empty() -> Self {
        Self {
            runs: Vec::new(),
            stop: BatchStop::Empty,
            skipped: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|run| run.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.succeeded()
    }
}

pub struct ExecutionController<'a, E> {
    executor: &'a E,
    control: &'a ExecutionControl,
    poll_interval: Duration,
}

impl<'a, E: TaskExecutor> ExecutionController<'a, E> {
    pub fn new(executor: &'a E, control: &'a ExecutionControl, poll_interval: Duration) -> Self {
        Self {
            executor,
            control,
            poll_interval,
        }
    }

    /// Run every pending task in FIFO order, continuing past failures.
    ///
    /// Stop and cancel requests take effect between tasks; pause blocks
    /// before the next task until resumed.
    #[instrument(skip_all)]
    pub fn execute_all_pending(
        &self,
        store: &mut TodoStore,
        observer: Observer<'_>,
    ) -> Result<BatchOutcome> {
        let queue = store.get_execution_queue();
        if queue.is_empty() {
            return Ok(BatchOutcome::empty());
        }
        let transition = self.control.start();
        if !transition.applied() {
            return Err(ValidationError::single(transition.to_string()).into());
        }
        info!(tasks = queue.len(), "batch started");

        let total = queue.len();
        let mut runs = Vec::with_capacity(total);
        let mut stop = BatchStop::Finished;
        for task in queue {
            if let Some(interrupted) = self.wait_until_runnable() {
                info!(state = ?interrupted, "batch interrupted");
                stop = interrupted;
                break;
            }
            if store.get(task.id).is_none_or(|current| current.status != TaskStatus::Pending) {
                debug!(todo_id = task.id, "task no longer pending, skipping");
                continue;
            }
            runs.push(self.run_task(store, task, observer));
        }
        self.control.finish();

        let outcome = BatchOutcome {
            skipped: total - runs.len(),
            runs,
            stop,
        };
        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            stop = ?outcome.stop,
            "batch finished"
        );
        Ok(outcome)
    }

    /// Run the earliest pending task, if any.
    pub fn execute_next(&self, store: &mut TodoStore, observer: Observer<'_>) -> Option<TaskRun> {
        let task = store.get_next_pending()?;
        Some(self.run_task(store, task, observer))
    }

    /// Run pending tasks before `stop_id`, halting on the first failure.
    pub fn execute_until(
        &self,
        store: &mut TodoStore,
        stop_id: u64,
        observer: Observer<'_>,
    ) -> BatchOutcome {
        let queue = store.get_until(stop_id);
        self.run_halting(store, queue, observer)
    }

    /// Run pending tasks from `start_id` through `end_id`, halting on the first failure.
    pub fn execute_range(
        &self,
        store: &mut TodoStore,
        start_id: u64,
        end_id: u64,
        observer: Observer<'_>,
    ) -> BatchOutcome {
        let queue = store.get_range(start_id, end_id);
        self.run_halting(store, queue, observer)
    }

    /// Run one task by id. It must exist and be pending.
    pub fn execute_by_id(
        &self,
        store: &mut TodoStore,
        id: u64,
        observer: Observer<'_>,
    ) -> Result<TaskRun> {
        let task = store
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::single(format!("Todo {id} not found")))?;
        if task.status != TaskStatus::Pending {
            return Err(ValidationError::single(format!(
                "Todo {id} is not pending (status: {})",
                task.status.as_str()
            ))
            .into());
        }
        Ok(self.run_task(store, task, observer))
    }

    fn run_halting(
        &self,
        store: &mut TodoStore,
        queue: Vec<Task>,
        observer: Observer<'_>,
    ) -> BatchOutcome {
        if queue.is_empty() {
            return BatchOutcome::empty();
        }
        let total = queue.len();
        let mut runs = Vec::with_capacity(total);
        let mut stop = BatchStop::Finished;
        for task in queue {
            let run = self.run_task(store, task, observer);
            let failed = !run.succeeded();
            runs.push(run);
            if failed {
                warn!("halting sequence after failure");
                stop = BatchStop::Halted;
                break;
            }
        }
        BatchOutcome {
            skipped: total - runs.len(),
            runs,
            stop,
        }
    }

    #[instrument(skip_all, fields(todo_id = task.id))]
    fn run_task(&self, store: &mut TodoStore, task: Task, observer: Observer<'_>) -> TaskRun {
        store.mark_in_progress(task.id);
        observer(&TaskEvent::Started(&task), store);

        let outcome = self.executor.execute_single(&task);
        match &outcome {
            Ok(done) => {
                store.mark_completed(task.id);
                info!(title = %task.title, "task completed");
                observer(&TaskEvent::Completed(&task, done), store);
            }
            Err(err) => {
                store.mark_pending(task.id);
                warn!(title = %task.title, err = %err, "task failed");
                observer(&TaskEvent::Failed(&task, err), store);
            }
        }
        TaskRun { task, outcome }
    }

    /// Block while paused. `Some` when the batch must end instead.
    fn wait_until_runnable(&self) -> Option<BatchStop> {
        loop {
            match self.control.state() {
                ExecutionState::Running => return None,
                ExecutionState::Paused => thread::sleep(self.poll_interval),
                ExecutionState::Stopped => return Some(BatchStop::Stopped),
                ExecutionState::Cancelled => return Some(BatchStop::Cancelled),
            }
        }
    }
}

/// Observer that ignores every event.
pub fn ignore_events(_: &TaskEvent<'_>, _: &TodoStore) {}
