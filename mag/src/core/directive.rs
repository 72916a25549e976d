//! Tokenizer for control directives embedded in LLM chat text.
//!
//! [`tokenize`] splits text into literal spans and directive spans in a single
//! left-to-right pass. Delimited todo blocks are located first; call-style
//! directives are only recognized in the text between blocks, so a block whose
//! description mentions `add_todo(..)` is one directive, not two.
//!
//! Substitution (and the store mutations it implies) lives in
//! [`crate::directives`].

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::todo::{Task, TaskStatus};

/// Marker that opens and closes a block-style todo.
pub const BLOCK_SEPARATOR: &str = "<TODO_SEPARATOR>";

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<TODO_SEPARATOR>[^\n]*\n(?P<body>(?s:.*?\n)??)<TODO_SEPARATOR>")
        .expect("block directive regex is valid")
});

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"add_todo\s*\(\s*['"](?P<add_title>.*?)['"]\s*,\s*['"](?P<add_desc>.*?)['"]\s*\)"#,
        r"|(?P<list>list_todos\s*\(\s*\))",
        r"|mark_complete\s*\(\s*(?P<complete_id>\d+)\s*\)",
        r"|delete_todo\s*\(\s*(?P<delete_id>\d+)\s*\)",
        r"|(?P<next>execute_next\s*\(\s*\))",
        r"|(?P<all>execute_all\s*\(\s*\))",
        r"|execute_todo\s*\(\s*(?P<execute_id>\d+)\s*\)",
        r#"|request_user_approval\s*\(\s*['"](?P<reason>.*?)['"]\s*\)"#,
    ))
    .expect("call directive regex is valid")
});

static DIRECTIVE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(add|list|mark|delete|execute|request|<TODO)",
        r"_(todos?|complete|next|all|user_approval|SEPARATOR>)",
    ))
    .expect("directive name regex is valid")
});

/// Markdown-escape the underscore in every directive name and block marker,
/// so interpolated titles and descriptions can never be tokenized again.
///
/// Renders unchanged as markdown.
pub fn defuse(text: &str) -> Cow<'_, str> {
    DIRECTIVE_NAME_RE.replace_all(text, r"${1}\_${2}")
}

/// A recognized directive with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Call-style `add_todo(title, description)`.
    AddTodo { title: String, description: String },
    /// Block-style todo between two [`BLOCK_SEPARATOR`] markers. Fields are trimmed.
    AddTodoBlock { title: String, description: String },
    ListTodos,
    MarkComplete(u64),
    DeleteTodo(u64),
    ExecuteNext,
    ExecuteAll,
    ExecuteTodo(u64),
    RequestApproval { reason: String },
}

impl Directive {
    /// Processing phase. Directives are applied phase by phase, and in text
    /// order within a phase.
    pub fn phase(&self) -> u8 {
        match self {
            Directive::AddTodo { .. } => 0,
            Directive::AddTodoBlock { .. } => 1,
            Directive::ListTodos => 2,
            Directive::MarkComplete(_) => 3,
            Directive::DeleteTodo(_) => 4,
            Directive::ExecuteNext => 5,
            Directive::ExecuteAll => 6,
            Directive::ExecuteTodo(_) => 7,
            Directive::RequestApproval { .. } => 8,
        }
    }
}

/// One piece of tokenized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span<'a> {
    Literal(&'a str),
    Directive { directive: Directive, raw: &'a str },
}

/// Split `text` into literal and directive spans, preserving every byte.
///
/// Malformed blocks and calls with unparsable ids stay literal.
pub fn tokenize(text: &str) -> Vec<Span<'_>> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    for block in BLOCK_RE.captures_iter(text) {
        let Some(whole) = block.get(0) else {
            continue;
        };
        let body = block.name("body").map_or("", |m| m.as_str());
        let Some((title, description)) = parse_block_body(body) else {
            continue;
        };
        tokenize_calls(&text[cursor..whole.start()], &mut spans);
        spans.push(Span::Directive {
            directive: Directive::AddTodoBlock { title, description },
            raw: whole.as_str(),
        });
        cursor = whole.end();
    }
    tokenize_calls(&text[cursor..], &mut spans);
    spans
}

/// Title runs from `Title:` to the end of its line; description is everything
/// after `Description:`. Both trimmed; a blank title makes the block malformed.
fn parse_block_body(body: &str) -> Option<(String, String)> {
    let title_start = body.find("Title:")? + "Title:".len();
    let desc_start = body.find("Description:")? + "Description:".len();
    let title_line = &body[title_start..];
    let title = title_line[..title_line.find('\n').unwrap_or(title_line.len())].trim();
    if title.is_empty() {
        return None;
    }
    Some((title.to_string(), body[desc_start..].trim().to_string()))
}

fn tokenize_calls<'a>(text: &'a str, spans: &mut Vec<Span<'a>>) {
    let mut cursor = 0;
    for caps in CALL_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(directive) = call_directive(&caps) else {
            continue;
        };
        if whole.start() > cursor {
            spans.push(Span::Literal(&text[cursor..whole.start()]));
        }
        spans.push(Span::Directive {
            directive,
            raw: whole.as_str(),
        });
        cursor = whole.end();
    }
    if cursor < text.len() {
        spans.push(Span::Literal(&text[cursor..]));
    }
}

fn call_directive(caps: &Captures<'_>) -> Option<Directive> {
    let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    let id = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok());

    if let Some(title) = text("add_title") {
        return Some(Directive::AddTodo {
            title,
            description: text("add_desc").unwrap_or_default(),
        });
    }
    if caps.name("list").is_some() {
        return Some(Directive::ListTodos);
    }
    if caps.name("complete_id").is_some() {
        return id("complete_id").map(Directive::MarkComplete);
    }
    if caps.name("delete_id").is_some() {
        return id("delete_id").map(Directive::DeleteTodo);
    }
    if caps.name("next").is_some() {
        return Some(Directive::ExecuteNext);
    }
    if caps.name("all").is_some() {
        return Some(Directive::ExecuteAll);
    }
    if caps.name("execute_id").is_some() {
        return id("execute_id").map(Directive::ExecuteTodo);
    }
    text("reason").map(|reason| Directive::RequestApproval { reason })
}

/// Bullet list of todos with a status glyph, id, title and description line.
pub fn render_todo_list(tasks: &[&Task]) -> String {
    let mut out = String::from("\n**Current Todos:**\n");
    if tasks.is_empty() {
        out.push_str("- No todos yet\n");
        return out;
    }
    for task in tasks {
        let icon = if task.status == TaskStatus::Completed {
            "✅"
        } else {
            "⏳"
        };
        out.push_str(&format!("- {icon} {}: {}\n", task.id, task.title));
        if !task.description.is_empty() {
            out.push_str(&format!("  {}\n", task.description));
        }
    }
    out
}

/// Fixed pause message shown in place of `request_user_approval(reason)`.
pub fn approval_message(reason: &str) -> String {
    format!(
        "**⏸️  Requesting User Approval:** {reason}\n\n\
         I've paused here to get your approval. Please review the pending todos \
         and use /do commands when you're ready to proceed."
    )
}
