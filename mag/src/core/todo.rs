//! In-memory todo store with the pending → in-progress → completed lifecycle.
//!
//! Ids start at 1, increase strictly and are never reused, even after delete.
//! The store has no internal locking; exactly one owner mutates it.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

/// A unit of work owned by the [`TodoStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub updated_at: u64,
}

impl Task {
    /// Text handed to the classifier and the LLM: `title - description`.
    pub fn prompt_text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.title, self.description)
        }
    }
}

/// Fields to change in [`TodoStore::update`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Ordered todo collection. Serialized form is `{next_id, todos}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoStore {
    next_id: u64,
    todos: Vec<Task>,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self {
            next_id: 1,
            todos: Vec::new(),
        }
    }
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `add` will assign.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Check a deserialized store: ids must be unique, and `next_id` is raised
    /// past the largest stored id. Returns whether `next_id` was raised.
    pub fn reconcile(&mut self) -> Result<bool> {
        let mut seen = HashSet::new();
        if let Some(task) = self.todos.iter().find(|task| !seen.insert(task.id)) {
            return Err(ValidationError::single(format!("Duplicate todo id {}", task.id)).into());
        }
        let floor = self.todos.iter().map(|task| task.id + 1).max().unwrap_or(1);
        if self.next_id >= floor {
            return Ok(false);
        }
        self.next_id = floor;
        Ok(true)
    }

    /// Append a pending task and return its id.
    pub fn add(&mut self, title: &str, description: &str) -> Result<u64> {
        if title.trim().is_empty() {
            return Err(ValidationError::single("Todo title cannot be empty").into());
        }
        let now = unix_now();
        let id = self.next_id;
        self.next_id += 1;
        self.todos.push(Task {
            id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.todos.iter().find(|task| task.id == id)
    }

    /// Tasks in insertion order; completed ones only when requested.
    pub fn list(&self, include_completed: bool) -> Vec<&Task> {
        self.todos
            .iter()
            .filter(|task| include_completed || task.status != TaskStatus::Completed)
            .collect()
    }

    /// Apply the provided fields. Returns false if `id` is unknown or nothing changed.
    ///
    /// An empty new title is ignored rather than clearing the title.
    pub fn update(&mut self, id: u64, update: TaskUpdate) -> bool {
        let Some(task) = self.todos.iter_mut().find(|task| task.id == id) else {
            return false;
        };
        let mut changed = false;
        if let Some(title) = update.title
            && !title.is_empty()
            && title != task.title
        {
            task.title = title;
            changed = true;
        }
        if let Some(description) = update.description
            && description != task.description
        {
            task.description = description;
            changed = true;
        }
        if let Some(status) = update.status
            && status != task.status
        {
            task.status = status;
            changed = true;
        }
        if changed {
            task.updated_at = unix_now();
        }
        changed
    }

    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.todos.len();
        self.todos.retain(|task| task.id != id);
        self.todos.len() != before
    }

    pub fn get_pending(&self) -> Vec<&Task> {
        self.with_status(TaskStatus::Pending)
    }

    pub fn get_completed(&self) -> Vec<&Task> {
        self.with_status(TaskStatus::Completed)
    }

    pub fn count_pending(&self) -> usize {
        self.todos
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .count()
    }

    /// Earliest-created pending task.
    pub fn get_next_pending(&self) -> Option<Task> {
        self.get_execution_queue().into_iter().next()
    }

    /// Snapshot of pending tasks sorted by creation time (FIFO dispatch order).
    ///
    /// Ties keep insertion order.
    pub fn get_execution_queue(&self) -> Vec<Task> {
        let mut queue: Vec<Task> = self.get_pending().into_iter().cloned().collect();
        queue.sort_by_key(|task| task.created_at);
        queue
    }

    /// Queue prefix ending just before `stop_id`. The whole queue if `stop_id` never appears.
    pub fn get_until(&self, stop_id: u64) -> Vec<Task> {
        self.get_execution_queue()
            .into_iter()
            .take_while(|task| task.id != stop_id)
            .collect()
    }

    /// Queue slice from `start_id` through `end_id`, both inclusive.
    ///
    /// Empty if `start_id` is not pending. Runs to the end of the queue when
    /// `end_id` does not follow `start_id`.
    pub fn get_range(&self, start_id: u64, end_id: u64) -> Vec<Task> {
        let mut selected = Vec::new();
        for task in self
            .get_execution_queue()
            .into_iter()
            .skip_while(|task| task.id != start_id)
        {
            let done = task.id == end_id;
            selected.push(task);
            if done {
                break;
            }
        }
        selected
    }

    pub fn mark_in_progress(&mut self, id: u64) -> bool {
        self.update(id, TaskUpdate::status(TaskStatus::InProgress))
    }

    pub fn mark_completed(&mut self, id: u64) -> bool {
        self.update(id, TaskUpdate::status(TaskStatus::Completed))
    }

    pub fn mark_pending(&mut self, id: u64) -> bool {
        self.update(id, TaskUpdate::status(TaskStatus::Pending))
    }

    fn with_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.todos
            .iter()
            .filter(|task| task.status == status)
            .collect()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(titles: &[&str]) -> TodoStore {
        let mut store = TodoStore::new();
        for title in titles {
            store.add(title, "").expect("add");
        }
        store
    }

    fn ids(tasks: &[Task]) -> Vec<u64> {
        tasks.iter().map(|task| task.id).collect()
    }

    /// Ids increase strictly and are never handed out twice, even after delete.
    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut store = store_with(&["a", "b"]);
        assert!(store.delete(2));
        let id = store.add("c", "").expect("add");
        assert_eq!(id, 3);
        assert_eq!(store.next_id(), 4);
    }

    /// Empty and whitespace-only titles are rejected with a validation error.
    #[test]
    fn add_rejects_empty_title() {
        let mut store = TodoStore::new();
        for title in ["", "   "] {
            let err = store.add(title, "desc").expect_err("empty title");
            let validation = err.downcast_ref::<ValidationError>().expect("validation");
            assert_eq!(validation.errors, vec!["Todo title cannot be empty"]);
        }
        assert!(store.list(true).is_empty());
        assert_eq!(store.next_id(), 1);
    }

    /// Completed tasks are hidden from `list(false)` but kept in insertion order otherwise.
    #[test]
    fn list_filters_completed() {
        let mut store = store_with(&["a", "b", "c"]);
        store.mark_completed(2);
        let open: Vec<u64> = store.list(false).iter().map(|task| task.id).collect();
        let all: Vec<u64> = store.list(true).iter().map(|task| task.id).collect();
        assert_eq!(open, vec![1, 3]);
        assert_eq!(all, vec![1, 2, 3]);
    }

    /// Update reports false for unknown ids and for no-op changes.
    #[test]
    fn update_only_reports_real_changes() {
        let mut store = store_with(&["a"]);
        assert!(!store.update(42, TaskUpdate::status(TaskStatus::Completed)));
        assert!(!store.update(1, TaskUpdate::status(TaskStatus::Pending)));
        assert!(!store.update(
            1,
            TaskUpdate {
                title: Some(String::new()),
                ..TaskUpdate::default()
            }
        ));
        assert!(store.update(
            1,
            TaskUpdate {
                title: Some("renamed".to_string()),
                description: Some("details".to_string()),
                status: None,
            }
        ));
        let task = store.get(1).expect("task");
        assert_eq!(task.title, "renamed");
        assert_eq!(task.description, "details");
        assert_eq!(task.status, TaskStatus::Pending);
    }

    /// Status helpers move a task through its lifecycle and back.
    #[test]
    fn mark_helpers_transition_status() {
        let mut store = store_with(&["a"]);
        assert!(store.mark_in_progress(1));
        assert_eq!(store.count_pending(), 0);
        assert!(store.mark_pending(1));
        assert_eq!(store.count_pending(), 1);
        assert!(store.mark_completed(1));
        assert_eq!(store.get_completed().len(), 1);
        assert!(!store.mark_completed(1));
    }

    /// The execution queue orders by creation time, not insertion order.
    #[test]
    fn execution_queue_sorts_by_created_at() {
        let json = r#"{"next_id":4,"todos":[
            {"id":1,"title":"late","description":"","status":"pending","created_at":30,"updated_at":30},
            {"id":2,"title":"done","description":"","status":"completed","created_at":5,"updated_at":5},
            {"id":3,"title":"early","description":"","status":"pending","created_at":10,"updated_at":10}
        ]}"#;
        let store: TodoStore = serde_json::from_str(json).expect("parse");
        assert_eq!(ids(&store.get_execution_queue()), vec![3, 1]);
        assert_eq!(store.get_next_pending().map(|task| task.id), Some(3));
    }

    /// `get_until` excludes the stop id and returns everything when it is absent.
    #[test]
    fn get_until_stops_before_stop_id() {
        let store = store_with(&["a", "b", "c", "d"]);
        assert_eq!(ids(&store.get_until(3)), vec![1, 2]);
        assert_eq!(ids(&store.get_until(1)), Vec::<u64>::new());
        assert_eq!(ids(&store.get_until(99)), vec![1, 2, 3, 4]);
    }

    /// `get_range` is inclusive on both ends with open-ended and empty fallbacks.
    #[test]
    fn get_range_bounds() {
        let mut store = store_with(&["a", "b", "c", "d", "e"]);
        assert_eq!(ids(&store.get_range(2, 4)), vec![2, 3, 4]);
        assert_eq!(ids(&store.get_range(3, 3)), vec![3]);
        assert_eq!(ids(&store.get_range(4, 99)), vec![4, 5]);
        assert_eq!(ids(&store.get_range(4, 2)), vec![4, 5]);
        assert!(store.get_range(99, 2).is_empty());

        store.mark_completed(2);
        assert!(store.get_range(2, 4).is_empty());
    }

    /// Serialized form round-trips field for field.
    #[test]
    fn store_round_trips_through_json() {
        let mut store = store_with(&["a", "b"]);
        store.mark_in_progress(2);
        store.delete(1);
        let json = serde_json::to_string(&store).expect("serialize");
        assert!(json.contains("\"status\":\"in_progress\""));
        let back: TodoStore = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, store);
    }

    /// Prompt text joins title and description only when a description exists.
    #[test]
    fn prompt_text_joins_description() {
        let mut store = TodoStore::new();
        store.add("Build", "").expect("add");
        store.add("Create hello", "Python script").expect("add");
        assert_eq!(store.get(1).expect("task").prompt_text(), "Build");
        assert_eq!(
            store.get(2).expect("task").prompt_text(),
            "Create hello - Python script"
        );
    }
}
