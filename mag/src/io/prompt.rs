//! Prompt rendering for the LLM backend.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::directive::BLOCK_SEPARATOR;
use crate::core::types::ChatMessage;

const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");
const FILE_ACTION_TEMPLATE: &str = include_str!("prompts/file_action.md");
const GENERIC_ACTION_TEMPLATE: &str = include_str!("prompts/generic_action.md");

/// Policy facts surfaced to the model so its proposals tend to pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptHints {
    /// Directories the file tool may create in.
    pub allowed_directories: Vec<String>,
    /// First tokens the shell tool accepts.
    pub allowed_commands: Vec<String>,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("chat", CHAT_TEMPLATE)
            .expect("chat template should be valid");
        env.add_template("file_action", FILE_ACTION_TEMPLATE)
            .expect("file action template should be valid");
        env.add_template("generic_action", GENERIC_ACTION_TEMPLATE)
            .expect("generic action template should be valid");
        Self { env }
    }
}

/// Conversational prompt carrying the directive vocabulary and prior turns.
pub fn render_chat(prompt: &str, history: &[ChatMessage], hints: &PromptHints) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("chat")?;
    let rendered = template.render(context! {
        prompt => prompt.trim(),
        history => history,
        allowed_directories => visible_dirs(&hints.allowed_directories),
        separator => BLOCK_SEPARATOR,
    })?;
    Ok(rendered)
}

/// Prompt asking for a single `{"command","path","content"}` object.
pub fn render_file_action(prompt: &str, hints: &PromptHints) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("file_action")?;
    let rendered = template.render(context! {
        prompt => prompt.trim(),
        allowed_directories => visible_dirs(&hints.allowed_directories),
    })?;
    Ok(rendered)
}

/// Prompt asking for a tagged FILE_WRITE / BASH_COMMAND object.
pub fn render_generic_action(prompt: &str, hints: &PromptHints) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("generic_action")?;
    let rendered = template.render(context! {
        prompt => prompt.trim(),
        allowed_commands => &hints.allowed_commands,
    })?;
    Ok(rendered)
}

/// The `""` sentinel means "anywhere" and is not worth listing.
fn visible_dirs(dirs: &[String]) -> Vec<&str> {
    if dirs.iter().any(String::is_empty) {
        return Vec::new();
    }
    dirs.iter().map(String::as_str).collect()
}
