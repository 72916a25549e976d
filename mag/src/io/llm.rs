//! LLM backend abstraction and the local-CLI provider table.
//!
//! Every provider is a command that reads the rendered prompt on stdin and
//! prints its reply on stdout. Structured proposals are taken from the first
//! JSON object in the reply so providers that wrap JSON in prose or code
//! fences still work.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::config::{LlmConfig, ProviderConfig};
use super::process::{Limits, run_captured};
use super::prompt::{PromptHints, render_chat, render_file_action, render_generic_action};
use crate::core::types::{ActionProposal, ChatMessage, FileWriteProposal};
use crate::error::{CommunicationError, ValidationError};

/// Alternate names accepted by [`LlmBackend::set_provider`].
const PROVIDER_ALIASES: &[(&str, &str)] = &[("claude", "anthropic"), ("chatgpt", "openai")];

/// Abstraction over LLM backends.
///
/// Failures are surfaced as [`CommunicationError`] and never retried.
pub trait LlmBackend {
    /// Ask for a single file write.
    fn propose_file_action(&self, prompt: &str) -> Result<FileWriteProposal>;

    /// Ask for a file write or a shell command, whichever fits the request.
    fn propose_generic_action(&self, prompt: &str) -> Result<ActionProposal>;

    /// Free-form reply to a single prompt.
    fn chat(&self, prompt: &str) -> Result<String> {
        self.chat_with_history(prompt, &[])
    }

    /// Free-form reply given prior turns, oldest first.
    fn chat_with_history(&self, prompt: &str, history: &[ChatMessage]) -> Result<String>;

    /// Switch provider by name or alias.
    fn set_provider(&self, name: &str) -> Result<()>;

    fn current_provider(&self) -> String;

    /// Replace the policy facts rendered into prompts.
    fn set_hints(&self, _hints: PromptHints) {}
}

/// Canonical provider name for `name`, resolving aliases.
pub fn canonical_provider(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    PROVIDER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map_or(lowered, |(_, target)| (*target).to_string())
}

/// Backend that spawns a configured command per provider.
#[derive(Debug)]
pub struct CommandLlmBackend {
    providers: BTreeMap<String, ProviderConfig>,
    current: Mutex<String>,
    hints: Mutex<PromptHints>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandLlmBackend {
    pub fn new(
        config: &LlmConfig,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            providers: config.providers.clone(),
            current: Mutex::new(canonical_provider(&config.default_provider)),
            hints: Mutex::new(PromptHints::default()),
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    fn hints(&self) -> PromptHints {
        self.hints
            .lock()
            .map(|hints| hints.clone())
            .unwrap_or_default()
    }

    /// Run the current provider with `prompt` on stdin and return its stdout.
    #[instrument(skip_all, fields(provider = tracing::field::Empty))]
    fn invoke(&self, prompt: &str) -> Result<String> {
        let provider = self.current_provider();
        tracing::Span::current().record("provider", provider.as_str());
        let argv = self
            .providers
            .get(&provider)
            .map(|entry| entry.command.clone())
            .ok_or_else(|| {
                CommunicationError::new(&provider, "provider has no configured command")
            })?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CommunicationError::new(&provider, "empty provider command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        info!(program = %program, prompt_bytes = prompt.len(), "invoking llm provider");

        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let output = run_captured(cmd, Some(prompt.as_bytes()), limits).map_err(|err| CommunicationError::new(&provider, format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "llm provider timed out");
            return Err(CommunicationError::new(
                &provider,
                format!("timed out after {}s", self.timeout.as_secs()),
            )
            .into());
        }
        if !output.success() {
            warn!(exit_code = output.exit_code, "llm provider failed");
            return Err(CommunicationError::new(
                &provider,
                format!("exited with status {}: {}", output.exit_code, output.stderr.trim()),
            )
            .into());
        }

        let reply = output.stdout.trim().to_string();
        debug!(reply_bytes = reply.len(), "llm provider replied");
        Ok(reply)
    }

    fn invoke_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        let reply = self.invoke(prompt)?;
        parse_reply(&self.current_provider(), &reply)
    }
}

impl LlmBackend for CommandLlmBackend {
    fn propose_file_action(&self, prompt: &str) -> Result<FileWriteProposal> {
        let rendered = render_file_action(prompt, &self.hints())?;
        self.invoke_json(&rendered)
    }

    fn propose_generic_action(&self, prompt: &str) -> Result<ActionProposal> {
        let rendered = render_generic_action(prompt, &self.hints())?;
        self.invoke_json(&rendered)
    }

    fn chat_with_history(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let rendered = render_chat(prompt, history, &self.hints())?;
        self.invoke(&rendered)
    }

    fn set_provider(&self, name: &str) -> Result<()> {
        let canonical = canonical_provider(name);
        if !self.providers.contains_key(&canonical) {
            let known: Vec<&str> = self.providers.keys().map(String::as_str).collect();
            return Err(ValidationError::single(format!(
                "Unknown provider '{name}' (known: {})",
                known.join(", ")
            ))
            .into());
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("provider lock poisoned"))?;
        info!(from = %*current, to = %canonical, "switching llm provider");
        *current = canonical;
        Ok(())
    }

    fn current_provider(&self) -> String {
        self.current
            .lock()
            .map(|current| current.clone())
            .unwrap_or_default()
    }

    fn set_hints(&self, hints: PromptHints) {
        if let Ok(mut current) = self.hints.lock() {
            *current = hints;
        }
    }
}

/// Deserialize the first JSON object found in `reply`.
pub fn parse_reply<T: DeserializeOwned>(provider: &str, reply: &str) -> Result<T> {
    let json = extract_json_object(reply)
        .ok_or_else(|| CommunicationError::new(provider, "reply contains no JSON object"))?;
    serde_json::from_str(json).map_err(|err| {
        CommunicationError::new(provider, format!("malformed JSON reply: {err}")).into()
    })
}

/// Slice of the first balanced `{...}` in `text`, string-literal aware.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
