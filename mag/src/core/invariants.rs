//! Semantic policy invariants not expressible via JSON Schema.

use crate::core::policy::{Operation, PolicySettings};

const MAX_FILE_SIZE_MB_LIMIT: u64 = 1000;

/// Check policy invariants:
/// - Blocked extensions are non-empty and start with `.`
/// - `max_file_size_mb` is within `1..=1000`
/// - Tool names are non-empty
/// - Directory entries end with `/` and never contain `..`
///
/// The `""` directory sentinel is exempt from the directory rules.
pub fn validate_policy(settings: &PolicySettings) -> Vec<String> {
    let mut errors = Vec::new();

    for ext in &settings.global.blocked_extensions {
        if ext.is_empty() {
            errors.push("Empty extension in global.blocked_extensions".to_string());
        } else if !ext.starts_with('.') {
            errors.push(format!(
                "Extension '{ext}' must start with '.' in global.blocked_extensions"
            ));
        }
    }

    let max_mb = settings.global.max_file_size_mb;
    if max_mb == 0 || max_mb > MAX_FILE_SIZE_MB_LIMIT {
        errors.push(format!(
            "global.max_file_size_mb must be between 1 and {MAX_FILE_SIZE_MB_LIMIT}, got {max_mb}"
        ));
    }

    for (tool, policy) in &settings.tools {
        if tool.is_empty() {
            errors.push("Empty tool name in tools".to_string());
            continue;
        }
        for op in Operation::ALL {
            for dir in &policy.operation(op).allowed_directories {
                validate_directory(tool, op, dir, &mut errors);
            }
        }
    }

    errors
}

fn validate_directory(tool: &str, op: Operation, dir: &str, errors: &mut Vec<String>) {
    if dir.is_empty() {
        return;
    }
    if !dir.ends_with('/') {
        errors.push(format!("Directory '{dir}' in {tool}.{op} must end with '/'"));
    }
    if dir.contains("..") {
        errors.push(format!(
            "Directory '{dir}' in {tool}.{op} contains invalid path traversal sequence '..'"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{FILE_TOOL, ToolPolicy};

    /// Defaults satisfy every invariant.
    #[test]
    fn defaults_are_valid() {
        assert!(validate_policy(&PolicySettings::default()).is_empty());
    }

    /// A directory without a trailing separator is named with tool and operation.
    #[test]
    fn directory_missing_trailing_slash() {
        let mut settings = PolicySettings::default();
        settings
            .tools
            .get_mut(FILE_TOOL)
            .expect("file tool")
            .create
            .allowed_directories = vec!["src".to_string()];
        assert_eq!(
            validate_policy(&settings),
            vec!["Directory 'src' in file_tool.create must end with '/'"]
        );
    }

    /// Traversal segments are rejected even with a trailing slash.
    #[test]
    fn directory_with_traversal() {
        let mut settings = PolicySettings::default();
        settings
            .tools
            .get_mut(FILE_TOOL)
            .expect("file tool")
            .update
            .allowed_directories = vec!["src/../etc/".to_string(), String::new()];
        assert_eq!(
            validate_policy(&settings),
            vec![
                "Directory 'src/../etc/' in file_tool.update contains invalid path traversal sequence '..'"
            ]
        );
    }

    /// Global block reports extension and size problems together.
    #[test]
    fn global_violations_accumulate() {
        let mut settings = PolicySettings::default();
        settings.global.blocked_extensions = vec![String::new(), "pem".to_string()];
        settings.global.max_file_size_mb = 0;
        assert_eq!(
            validate_policy(&settings),
            vec![
                "Empty extension in global.blocked_extensions",
                "Extension 'pem' must start with '.' in global.blocked_extensions",
                "global.max_file_size_mb must be between 1 and 1000, got 0",
            ]
        );

        settings = PolicySettings::default();
        settings.global.max_file_size_mb = 1001;
        assert_eq!(validate_policy(&settings).len(), 1);
        settings.global.max_file_size_mb = 1000;
        assert!(validate_policy(&settings).is_empty());
    }

    /// An empty tool key is reported once without inspecting its directories.
    #[test]
    fn empty_tool_name() {
        let mut settings = PolicySettings::default();
        let mut tool = ToolPolicy::default();
        tool.create.allowed_directories = vec!["bad".to_string()];
        settings.tools.insert(String::new(), tool);
        assert_eq!(validate_policy(&settings), vec!["Empty tool name in tools"]);
    }
}
