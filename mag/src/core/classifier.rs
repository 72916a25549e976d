//! Deterministic routing of task text to the file or shell backend.
//!
//! Both functions are best-effort keyword heuristics over free text. The
//! dispatcher prefers asking the LLM for an exact command and only falls back
//! to [`extract_shell_command`] when that is disabled or fails.

/// Backend a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    File,
    Shell,
}

/// Substrings (matched against lower-cased text) that signal shell intent.
const SHELL_KEYWORDS: &[&str] = &[
    "run", "execute", "build", "compile", "make", "cmake", "npm", "yarn", "pip", "install", "test",
    "cd ", "ls", "pwd", "mkdir", "chmod", "grep", "find", "git ", "docker", "curl", "wget", "tar",
    "unzip", "export",
];

/// Script used when the text mentions a script without naming a `.py` file.
pub const FALLBACK_SCRIPT_COMMAND: &str = "python3 src/script.py";

/// Classify task text. Anything without a shell keyword is a file task.
pub fn classify(text: &str) -> TaskKind {
    let lower = text.to_ascii_lowercase();
    if SHELL_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        TaskKind::Shell
    } else {
        TaskKind::File
    }
}

/// An extraction rule sees the original text and its ASCII-lower-cased twin
/// (same byte offsets) and may claim the text.
type ExtractionRule = fn(&str, &str) -> Option<String>;

/// Ordered rules; the first match wins.
const EXTRACTION_RULES: &[(&str, ExtractionRule)] = &[
    ("python3 invocation", python3_invocation),
    ("python invocation", python_invocation),
    ("script mention", script_mention),
    ("run prefix", run_prefix),
    ("execute prefix", execute_prefix),
    ("make", make_keyword),
    ("build", build_keyword),
    ("test", test_keyword),
    ("npm install", npm_install),
    ("git", git_command),
];

/// Extract a shell command from task text using [`EXTRACTION_RULES`].
///
/// Returns the whole text verbatim when no rule matches.
pub fn extract_shell_command(text: &str) -> String {
    extract_with_rule(text).1
}

/// Like [`extract_shell_command`], also naming the rule that fired (`verbatim` if none).
pub fn extract_with_rule(text: &str) -> (&'static str, String) {
    let lower = text.to_ascii_lowercase();
    EXTRACTION_RULES
        .iter()
        .find_map(|(name, rule)| rule(text, &lower).map(|command| (*name, command)))
        .unwrap_or_else(|| ("verbatim", text.to_string()))
}

/// `<interpreter> <arg>` up to the next whitespace after the interpreter.
fn interpreter_invocation(text: &str, lower: &str, interpreter: &str) -> Option<String> {
    let start = lower.find(interpreter)?;
    let arg_start = start + interpreter.len();
    let end = text[arg_start..]
        .find([' ', '\t', '\n'])
        .map_or(text.len(), |offset| arg_start + offset);
    Some(text[start..end].to_string())
}

/// Text mentioning python or a script: run the named `.py` file, else the fallback.
fn script_mention(text: &str, lower: &str) -> Option<String> {
    if !lower.contains("python") && !lower.contains("script") {
        return None;
    }
    let Some(py_pos) = lower.find(".py") else {
        return Some(FALLBACK_SCRIPT_COMMAND.to_string());
    };
    let start = lower[..py_pos]
        .rfind([' ', '/'])
        .map_or(0, |pos| pos + 1);
    Some(format!("python3 {}", &text[start..py_pos + ".py".len()]))
}

fn python3_invocation(text: &str, lower: &str) -> Option<String> {
    interpreter_invocation(text, lower, "python3 ")
}

fn python_invocation(text: &str, lower: &str) -> Option<String> {
    interpreter_invocation(text, lower, "python ")
}

fn run_prefix(text: &str, lower: &str) -> Option<String> {
    let pos = lower.find("run ")?;
    Some(text[pos + "run ".len()..].trim_start().to_string())
}

fn execute_prefix(text: &str, lower: &str) -> Option<String> {
    let pos = lower.find("execute ")?;
    Some(text[pos + "execute ".len()..].to_string())
}

fn make_keyword(_: &str, lower: &str) -> Option<String> {
    lower.contains("make").then(|| "make".to_string())
}

fn build_keyword(_: &str, lower: &str) -> Option<String> {
    lower.contains("build").then(|| "make".to_string())
}

fn test_keyword(_: &str, lower: &str) -> Option<String> {
    lower.contains("test").then(|| "make test".to_string())
}

fn npm_install(_: &str, lower: &str) -> Option<String> {
    lower
        .contains("npm install")
        .then(|| "npm install".to_string())
}

fn git_command(text: &str, lower: &str) -> Option<String> {
    let pos = lower.find("git ")?;
    Some(text[pos..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell keywords route to the shell backend regardless of case.
    #[test]
    fn classify_shell_keywords() {
        for text in [
            "Run the tests",
            "BUILD the project",
            "git commit the changes",
            "cd into src and list files",
            "Install dependencies",
        ] {
            assert_eq!(classify(text), TaskKind::Shell, "{text}");
        }
    }

    /// Text without shell keywords defaults to a file task.
    #[test]
    fn classify_defaults_to_file() {
        assert_eq!(classify("Create hello world - Python script"), TaskKind::File);
        assert_eq!(classify("Write a README"), TaskKind::File);
        assert_eq!(classify(""), TaskKind::File);
    }

    /// Explicit interpreter invocations keep only the first argument, original case.
    #[test]
    fn extract_interpreter_invocation() {
        assert_eq!(
            extract_shell_command("Please run python3 src/Hello.py and report"),
            "python3 src/Hello.py"
        );
        assert_eq!(extract_shell_command("python main.py"), "python main.py");
    }

    /// A named `.py` file is run with python3; otherwise the fallback script.
    #[test]
    fn extract_script_mentions() {
        assert_eq!(
            extract_shell_command("Execute the script src/count.py now"),
            "python3 count.py"
        );
        assert_eq!(
            extract_shell_command("Execute the script"),
            FALLBACK_SCRIPT_COMMAND
        );
        assert_eq!(
            extract_shell_command("Check the script output"),
            FALLBACK_SCRIPT_COMMAND
        );
    }

    /// Prefix rules strip the verb and keep the rest.
    #[test]
    fn extract_prefixes() {
        assert_eq!(extract_shell_command("Run   ls -la"), "ls -la");
        assert_eq!(extract_shell_command("execute cargo fmt"), "cargo fmt");
    }

    /// Bare keywords map to fixed commands in rule order.
    #[test]
    fn extract_keyword_mappings() {
        assert_eq!(extract_shell_command("Make everything"), "make");
        assert_eq!(extract_shell_command("Build it"), "make");
        assert_eq!(extract_shell_command("Test it"), "make test");
        assert_eq!(extract_shell_command("npm install"), "npm install");
        assert_eq!(
            extract_shell_command("Do git status please"),
            "git status please"
        );
    }

    /// Unmatched text is returned verbatim.
    #[test]
    fn extract_falls_back_to_whole_text() {
        assert_eq!(extract_shell_command("ls -la"), "ls -la");
        assert_eq!(
            extract_with_rule("ls -la"),
            ("verbatim", "ls -la".to_string())
        );
        assert_eq!(extract_with_rule("Build it").0, "build");
    }
}
