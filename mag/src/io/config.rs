//! Assistant configuration stored under `.mag/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// How shell tasks obtain their concrete command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandExtraction {
    /// Ask the LLM for the exact command; fall back to the heuristic on failure.
    Llm,
    /// Keyword heuristics only.
    Heuristic,
}

/// Assistant configuration (TOML).
///
/// Missing fields default to values suitable for a local interactive session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Policy document, relative to the project root.
    pub policy_path: PathBuf,

    /// Persisted todo store, relative to the project root.
    pub todos_path: PathBuf,

    /// How often a paused batch re-checks its state.
    pub pause_poll_interval_ms: u64,

    /// Wall-clock limit for a single shell command.
    pub shell_timeout_secs: u64,

    /// Wall-clock limit for a single LLM call.
    pub llm_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub command_extraction: CommandExtraction,

    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used until switched at runtime.
    pub default_provider: String,

    /// Per-provider command that reads a prompt on stdin and prints the reply.
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub command: Vec<String>,
}

impl ProviderConfig {
    fn new(argv: &[&str]) -> Self {
        Self {
            command: argv.iter().map(|arg| (*arg).to_string()).collect(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert("gemini".to_string(), ProviderConfig::new(&["gemini", "-p"]));
        providers.insert("anthropic".to_string(), ProviderConfig::new(&["claude", "-p"]));
        providers.insert("openai".to_string(), ProviderConfig::new(&["codex", "exec", "-"]));
        providers.insert("mistral".to_string(), ProviderConfig::new(&["mistral", "chat"]));
        Self {
            default_provider: "gemini".to_string(),
            providers,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from(".mag/policy.json"),
            todos_path: PathBuf::from(".mag/todos.json"),
            pause_poll_interval_ms: 100,
            shell_timeout_secs: 30,
            llm_timeout_secs: 120,
            output_limit_bytes: 100_000,
            command_extraction: CommandExtraction::Llm,
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pause_poll_interval_ms == 0 {
            return Err(anyhow!("pause_poll_interval_ms must be > 0"));
        }
        if self.shell_timeout_secs == 0 {
            return Err(anyhow!("shell_timeout_secs must be > 0"));
        }
        if self.llm_timeout_secs == 0 {
            return Err(anyhow!("llm_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for (name, provider) in &self.llm.providers {
            if provider.command.is_empty() || provider.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "llm.providers.{name}.command must be a non-empty array"
                ));
            }
        }
        if !self.llm.providers.contains_key(&self.llm.default_provider) {
            return Err(anyhow!(
                "llm.default_provider '{}' has no entry in llm.providers",
                self.llm.default_provider
            ));
        }
        Ok(())
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// Canonical locations under a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".mag");
        Self {
            root,
            config_path: state_dir.join("config.toml"),
            state_dir,
        }
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".mag/config.toml");
        let mut cfg = AppConfig::default();
        cfg.command_extraction = CommandExtraction::Heuristic;
        cfg.shell_timeout_secs = 5;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Partial files keep defaults for every omitted field.
    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "shell_timeout_secs = 7\ncommand_extraction = \"heuristic\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.shell_timeout_secs, 7);
        assert_eq!(cfg.command_extraction, CommandExtraction::Heuristic);
        assert_eq!(cfg.pause_poll_interval_ms, 100);
        assert_eq!(cfg.llm, LlmConfig::default());
    }

    /// Zero limits and dangling provider names are rejected.
    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.pause_poll_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.llm.default_provider = "nobody".to_string();
        let err = cfg.validate().expect_err("dangling provider");
        assert!(err.to_string().contains("nobody"));

        let mut cfg = AppConfig::default();
        cfg.llm
            .providers
            .insert("empty".to_string(), ProviderConfig { command: vec![] });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn project_paths_resolve_relative_to_root() {
        let paths = ProjectPaths::new("/work");
        assert_eq!(paths.config_path, PathBuf::from("/work/.mag/config.toml"));
        assert_eq!(
            paths.resolve(Path::new(".mag/policy.json")),
            PathBuf::from("/work/.mag/policy.json")
        );
        assert_eq!(paths.resolve(Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }
}
