//! Todo store persistence (`.mag/todos.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::todo::TodoStore;

/// Load the store, or an empty one if the file does not exist yet.
pub fn load_todos(path: &Path) -> Result<TodoStore> {
    if !path.exists() {
        debug!(path = %path.display(), "no todo file, starting empty");
        return Ok(TodoStore::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read todos {}", path.display()))?;
    let mut store: TodoStore = serde_json::from_str(&contents)
        .with_context(|| format!("parse todos {}", path.display()))?;
    if store
        .reconcile()
        .with_context(|| format!("check todos {}", path.display()))?
    {
        warn!(path = %path.display(), next_id = store.next_id(), "raised stale next_id");
    }
    debug!(
        path = %path.display(),
        next_id = store.next_id(),
        pending = store.count_pending(),
        "todos loaded"
    );
    Ok(store)
}

/// Atomically write the store to disk (temp file + rename).
pub fn write_todos(path: &Path, store: &TodoStore) -> Result<()> {
    debug!(path = %path.display(), next_id = store.next_id(), "writing todos");
    let mut buf = serde_json::to_string_pretty(store)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
