//! Policy engine: path, size and command authorization against the live settings.
//!
//! Settings are held behind a lock as an `Arc` and only ever replaced as a
//! whole through [`PolicyEngine::update_settings`], so readers see either the
//! old document or the new one.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::invariants::validate_policy;
use crate::core::policy::{BASH_TOOL, FILE_TOOL, Operation, PolicySettings};
use crate::error::{PolicyViolation, ValidationError};
use crate::io::policy_store::{load_or_create_policy, write_policy};
use crate::io::prompt::PromptHints;

#[derive(Debug)]
pub struct PolicyEngine {
    settings: RwLock<Arc<PolicySettings>>,
    root: PathBuf,
    policy_path: Option<PathBuf>,
}

impl PolicyEngine {
    /// Engine over in-memory settings; updates are not persisted.
    pub fn new(settings: PolicySettings, root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve working directory {}", root.display()))?;
        Ok(Self {
            settings: RwLock::new(Arc::new(settings)),
            root,
            policy_path: None,
        })
    }

    /// Load the policy document (writing defaults if absent) and persist updates to it.
    ///
    /// A present but invalid document is fatal: the error carries a
    /// [`crate::error::ConfigurationError`].
    pub fn load(root: &Path, policy_path: &Path) -> Result<Self> {
        let settings = load_or_create_policy(policy_path)?;
        let mut engine = Self::new(settings, root)?;
        engine.policy_path = Some(policy_path.to_path_buf());
        Ok(engine)
    }

    /// Canonical working directory every path must stay inside.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Arc<PolicySettings> {
        match self.settings.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Path relative to the working directory with `/` separators, or `None`
    /// if it resolves outside.
    pub fn relative_path(&self, path: &str) -> Option<String> {
        let resolved = resolve_path(&self.root, Path::new(path))?;
        let relative = resolved.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// First rule `path` fails for `tool`/`op`, if any.
    pub fn path_violation(&self, tool: &str, op: Operation, path: &str) -> Option<String> {
        let Some(relative) = self.relative_path(path) else {
            return Some(format!("Path '{path}' resolves outside the working directory"));
        };
        let settings = self.settings();
        if settings.has_blocked_extension(Path::new(&relative)) {
            return Some(format!("File extension of '{path}' is blocked"));
        }
        if !settings.directory_allowed(tool, op, &relative) {
            return Some(format!(
                "Path '{path}' is not in allowed directories for {tool}.{op}"
            ));
        }
        None
    }

    pub fn is_allowed(&self, tool: &str, op: Operation, path: &str) -> bool {
        let violation = self.path_violation(tool, op, path);
        debug!(tool, op = %op, path, allowed = violation.is_none(), "path check");
        violation.is_none()
    }

    /// [`Self::is_allowed`] as a typed failure.
    pub fn check_path(&self, tool: &str, op: Operation, path: &str) -> Result<()> {
        match self.path_violation(tool, op, path) {
            Some(reason) => {
                warn!(tool, op = %op, path, reason = %reason, "path denied");
                Err(PolicyViolation::new(path, reason).into())
            }
            None => Ok(()),
        }
    }

    pub fn is_file_size_allowed(&self, bytes: u64) -> bool {
        self.settings().file_size_allowed(bytes)
    }

    pub fn check_file_size(&self, path: &str, bytes: u64) -> Result<()> {
        let settings = self.settings();
        if settings.file_size_allowed(bytes) {
            return Ok(());
        }
        Err(PolicyViolation::new(
            path,
            format!(
                "File size {bytes} bytes exceeds limit of {} MB",
                settings.global.max_file_size_mb
            ),
        )
        .into())
    }

    pub fn is_bash_command_allowed(&self, command: &str) -> bool {
        self.settings().command_allowed(command)
    }

    /// Human-readable reason `command` is denied; empty when allowed.
    pub fn get_bash_command_violation_reason(&self, command: &str) -> String {
        self.settings()
            .command_violation(command)
            .map(|violation| violation.to_string())
            .unwrap_or_default()
    }

    pub fn check_command(&self, command: &str) -> Result<()> {
        match self.settings().command_violation(command) {
            Some(violation) => {
                warn!(command, reason = %violation, "command denied");
                Err(PolicyViolation::new(command, violation.to_string()).into())
            }
            None => Ok(()),
        }
    }

    pub fn confirmation_required(&self, tool: &str, op: Operation) -> bool {
        self.settings().confirmation_required(tool, op)
    }

    /// Validate, persist, then swap in `new_settings`.
    ///
    /// On any failure the previous settings stay active.
    #[instrument(skip_all)]
    pub fn update_settings(&self, new_settings: PolicySettings) -> Result<()> {
        let errors = validate_policy(&new_settings);
        if !errors.is_empty() {
            warn!(errors = errors.len(), "rejected policy update");
            return Err(ValidationError::new(errors).into());
        }
        if let Some(path) = &self.policy_path {
            write_policy(path, &new_settings)?;
        }
        let mut guard = self
            .settings
            .write()
            .map_err(|_| anyhow!("policy settings lock poisoned"))?;
        *guard = Arc::new(new_settings);
        info!("policy settings replaced");
        Ok(())
    }

    /// Allow-lists rendered into LLM prompts.
    pub fn prompt_hints(&self) -> PromptHints {
        let settings = self.settings();
        PromptHints {
            allowed_directories: settings
                .operation(FILE_TOOL, Operation::Create)
                .map(|policy| policy.allowed_directories.clone())
                .unwrap_or_default(),
            allowed_commands: settings
                .operation(BASH_TOOL, Operation::Create)
                .map(|policy| policy.allowed_commands.clone())
                .unwrap_or_default(),
        }
    }
}

/// Symlink hops followed before a path is treated as unresolvable.
const MAX_SYMLINK_HOPS: usize = 40;

/// Absolute form of `path` as the OS would reach it.
///
/// Components are walked in order: every existing symlink is replaced by its
/// target before the next component (including `..`) is applied, so `..`
/// always pops a real directory. Dangling links are followed too. The
/// non-existent tail is kept lexically. `None` on a symlink loop.
fn resolve_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut pending: VecDeque<OsString> = joined
        .components()
        .map(|component| component.as_os_str().to_os_string())
        .collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;
    while let Some(part) = pending.pop_front() {
        match Path::new(&part).components().next() {
            Some(Component::CurDir) | None => {}
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::Normal(name)) => {
                let candidate = resolved.join(name);
                let is_link = fs::symlink_metadata(&candidate)
                    .is_ok_and(|meta| meta.file_type().is_symlink());
                if !is_link {
                    resolved = candidate;
                    continue;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return None;
                }
                let target = fs::read_link(&candidate).ok()?;
                if target.is_absolute() {
                    resolved = PathBuf::new();
                }
                for component in target.components().rev() {
                    pending.push_front(component.as_os_str().to_os_string());
                }
            }
            Some(other) => resolved.push(other.as_os_str()),
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::OperationPolicy;

    fn engine(root: &Path) -> PolicyEngine {
        PolicyEngine::new(PolicySettings::default(), root).expect("engine")
    }

    /// Default file policy: allowed prefixes pass, others are denied.
    #[test]
    fn allowed_directory_prefixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(policy.is_allowed(FILE_TOOL, Operation::Create, "src/app.py"));
        assert!(policy.is_allowed(FILE_TOOL, Operation::Create, "./docs/readme.md"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "build/out.o"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Update, "docs/readme.md"));
    }

    /// Traversal out of the working directory is denied even with an open allow-list.
    #[test]
    fn traversal_always_denied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        let mut open = PolicySettings::default();
        open.tools
            .get_mut(FILE_TOOL)
            .expect("file tool")
            .create
            .allowed_directories = vec![String::new()];
        policy.update_settings(open).expect("update");

        assert!(policy.is_allowed(FILE_TOOL, Operation::Create, "anything.txt"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "../etc/passwd"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/../../x"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "/etc/passwd"));
        assert_eq!(
            policy.path_violation(FILE_TOOL, Operation::Create, "../etc/passwd"),
            Some("Path '../etc/passwd' resolves outside the working directory".to_string())
        );
    }

    /// Absolute paths inside the working directory are accepted.
    #[test]
    fn absolute_inside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        let inside = policy.root().join("src/main.py");
        assert!(policy.is_allowed(
            FILE_TOOL,
            Operation::Create,
            &inside.display().to_string()
        ));
    }

    /// A symlink pointing outside cannot be used to escape.
    #[cfg(unix)]
    #[test]
    fn symlink_escape_denied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside");
        let root = temp.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        std::os::unix::fs::symlink(outside.path(), root.join("src/link")).expect("symlink");
        let policy = engine(root);
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/link/evil.py"));
        assert!(policy.is_allowed(FILE_TOOL, Operation::Create, "src/ok.py"));
    }

    /// `..` after a symlink pops the link's target, not the link itself.
    #[cfg(unix)]
    #[test]
    fn parent_of_symlink_is_resolved_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside");
        let root = temp.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::create_dir_all(outside.path().join("inner")).expect("mkdir");
        std::os::unix::fs::symlink(outside.path().join("inner"), root.join("src/link"))
            .expect("symlink");
        let policy = engine(root);
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/link/../escaped.py"));
        assert_eq!(policy.relative_path("src/link/.."), None);

        fs::create_dir_all(root.join("src/pkg")).expect("mkdir");
        std::os::unix::fs::symlink(root.join("src/pkg"), root.join("src/alias")).expect("symlink");
        assert_eq!(
            policy.relative_path("src/alias/../ok.py").as_deref(),
            Some("src/ok.py")
        );
    }

    /// Dangling links are followed to where a write would land.
    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_followed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside");
        let root = temp.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        std::os::unix::fs::symlink(outside.path().join("target.py"), root.join("src/dangling.py"))
            .expect("symlink");
        std::os::unix::fs::symlink("new.py", root.join("src/local.py")).expect("symlink");
        std::os::unix::fs::symlink("loop_b", root.join("src/loop_a")).expect("symlink");
        std::os::unix::fs::symlink("loop_a", root.join("src/loop_b")).expect("symlink");

        let policy = engine(root);
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/dangling.py"));
        assert_eq!(policy.relative_path("src/local.py").as_deref(), Some("src/new.py"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/loop_a"));
    }

    /// Empty allow-list denies everything, even the root itself.
    #[test]
    fn empty_allow_list_denies_all() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Delete, "src/a.py"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Delete, "."));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Delete, ""));
    }

    /// Blocked extensions are denied inside allowed directories.
    #[test]
    fn blocked_extension_denied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/server.pem"));
        assert!(!policy.is_allowed(FILE_TOOL, Operation::Create, "src/.env"));
        let err = policy
            .check_path(FILE_TOOL, Operation::Create, "src/id.KEY")
            .expect_err("denied");
        let violation = err.downcast_ref::<PolicyViolation>().expect("typed");
        assert!(violation.reason.contains("extension"));
    }

    /// `rm -rf /` is refused by the block-list even if `rm` were allowed.
    #[test]
    fn destructive_command_always_denied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(!policy.is_bash_command_allowed("rm -rf /"));

        let mut settings = PolicySettings::default();
        let bash = settings
            .tools
            .get_mut(BASH_TOOL)
            .expect("bash tool")
            .operation_mut(Operation::Create);
        bash.allowed_commands.push("rm".to_string());
        policy.update_settings(settings).expect("update");
        assert!(!policy.is_bash_command_allowed("rm -rf /"));
        assert_eq!(
            policy.get_bash_command_violation_reason("rm -rf /"),
            "Command contains blocked operation 'rm'"
        );
    }

    /// Allow-list checks the first token; empty reason when allowed.
    #[test]
    fn command_allow_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(policy.is_bash_command_allowed("python3 src/app.py"));
        assert_eq!(policy.get_bash_command_violation_reason("make test"), "");
        assert_eq!(
            policy.get_bash_command_violation_reason("docker ps"),
            "Command not in allowed list: 'docker'"
        );
        assert!(policy.check_command("docker ps").is_err());
    }

    /// Without an allow-list anything not blocked is allowed.
    #[test]
    fn no_allow_list_allows_unblocked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut settings = PolicySettings::default();
        let bash = settings
            .tools
            .get_mut(BASH_TOOL)
            .expect("bash tool")
            .operation_mut(Operation::Create);
        *bash = OperationPolicy {
            blocked_commands: vec!["sudo".to_string()],
            ..OperationPolicy::default()
        };
        let policy = PolicyEngine::new(settings, temp.path()).expect("engine");
        assert!(policy.is_bash_command_allowed("docker ps"));
        assert!(!policy.is_bash_command_allowed("sudo ls"));
    }

    /// Size limit is inclusive at max MB.
    #[test]
    fn file_size_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        assert!(policy.is_file_size_allowed(10 * 1_048_576));
        assert!(!policy.is_file_size_allowed(10 * 1_048_576 + 1));
        assert!(policy.check_file_size("src/big", 11 * 1_048_576).is_err());
    }

    /// Invalid updates are rejected with the rule and leave prior settings active.
    #[test]
    fn invalid_update_keeps_previous_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = engine(temp.path());
        let before = policy.settings();

        let mut bad = PolicySettings::default();
        bad.tools
            .get_mut(FILE_TOOL)
            .expect("file tool")
            .create
            .allowed_directories = vec!["src".to_string()];
        let err = policy.update_settings(bad).expect_err("rejected");
        let validation = err.downcast_ref::<ValidationError>().expect("typed");
        assert_eq!(
            validation.errors,
            vec!["Directory 'src' in file_tool.create must end with '/'"]
        );
        assert_eq!(*policy.settings(), *before);
    }

    /// Loaded engines persist accepted updates to the policy file.
    #[test]
    fn update_persists_when_loaded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".mag/policy.json");
        let policy = PolicyEngine::load(temp.path(), &path).expect("load");

        let mut settings = PolicySettings::default();
        settings.global.max_file_size_mb = 2;
        policy.update_settings(settings.clone()).expect("update");

        let reloaded = PolicyEngine::load(temp.path(), &path).expect("reload");
        assert_eq!(*reloaded.settings(), settings);
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"max_file_size_mb\": 2"));
    }

    /// Prompt hints mirror the create allow-lists.
    #[test]
    fn prompt_hints_from_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let hints = engine(temp.path()).prompt_hints();
        assert_eq!(hints.allowed_directories, vec!["src/", "tests/", "docs/"]);
        assert!(hints.allowed_commands.contains(&"python3".to_string()));
    }
}
