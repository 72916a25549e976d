//! Parser for slash commands typed at the interactive prompt.

use anyhow::Result;

use crate::error::ValidationError;

const DO_USAGE: &str = "Usage: /do all|next|until <id>|<start>-<end>|<id>";

/// Which pending todos a `/do` command selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoTarget {
    All,
    Next,
    Until(u64),
    Range(u64, u64),
    Single(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Do(DoTarget),
    Pause,
    Resume,
    Stop,
    Cancel,
    Status,
    Todo,
    /// Switch LLM provider (name as typed, aliases resolved by the backend).
    Provider(String),
    /// Ask the LLM for one concrete action and apply it after confirmation.
    Act(String),
}

const PROVIDER_COMMANDS: &[&str] = &["gemini", "claude", "chatgpt", "mistral"];

/// Parse a slash command. Returns `None` for lines that are not slash commands.
pub fn parse_control_command(line: &str) -> Option<Result<ControlCommand>> {
    let rest = line.trim().strip_prefix('/')?;
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or("");
    let args: Vec<&str> = words.collect();

    let parsed = match (name, args.as_slice()) {
        ("do", args) => parse_do(args).map(ControlCommand::Do),
        ("pause", []) => Ok(ControlCommand::Pause),
        ("resume", []) => Ok(ControlCommand::Resume),
        ("stop", []) => Ok(ControlCommand::Stop),
        ("cancel", []) => Ok(ControlCommand::Cancel),
        ("status", []) => Ok(ControlCommand::Status),
        ("todo", []) => Ok(ControlCommand::Todo),
        ("act", words) if !words.is_empty() => Ok(ControlCommand::Act(words.join(" "))),
        (provider, []) if PROVIDER_COMMANDS.contains(&provider) => {
            Ok(ControlCommand::Provider(provider.to_string()))
        }
        _ => Err(ValidationError::single(format!("Unknown command: /{rest}")).into()),
    };
    Some(parsed)
}

fn parse_do(args: &[&str]) -> Result<DoTarget> {
    let target = match args {
        ["all"] => DoTarget::All,
        ["next"] => DoTarget::Next,
        ["until", id] => DoTarget::Until(parse_id(id)?),
        [spec] => match spec.split_once('-') {
            Some((start, end)) => DoTarget::Range(parse_id(start)?, parse_id(end)?),
            None => DoTarget::Single(parse_id(spec)?),
        },
        _ => return Err(ValidationError::single(DO_USAGE).into()),
    };
    Ok(target)
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::single(format!("Invalid todo id '{raw}'. {DO_USAGE}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ControlCommand {
        parse_control_command(line)
            .expect("slash command")
            .expect("valid command")
    }

    /// Every `/do` form maps to its target.
    #[test]
    fn do_targets() {
        assert_eq!(parse("/do all"), ControlCommand::Do(DoTarget::All));
        assert_eq!(parse("/do next"), ControlCommand::Do(DoTarget::Next));
        assert_eq!(parse("/do until 4"), ControlCommand::Do(DoTarget::Until(4)));
        assert_eq!(parse("/do 2-5"), ControlCommand::Do(DoTarget::Range(2, 5)));
        assert_eq!(parse("  /do 3 "), ControlCommand::Do(DoTarget::Single(3)));
    }

    /// Execution controls, status and provider switches.
    #[test]
    fn simple_commands() {
        assert_eq!(parse("/pause"), ControlCommand::Pause);
        assert_eq!(parse("/resume"), ControlCommand::Resume);
        assert_eq!(parse("/stop"), ControlCommand::Stop);
        assert_eq!(parse("/cancel"), ControlCommand::Cancel);
        assert_eq!(parse("/status"), ControlCommand::Status);
        assert_eq!(parse("/todo"), ControlCommand::Todo);
        assert_eq!(
            parse("/claude"),
            ControlCommand::Provider("claude".to_string())
        );
        assert_eq!(
            parse("/act create  src/a.py"),
            ControlCommand::Act("create src/a.py".to_string())
        );
    }

    /// Plain chat lines are not commands.
    #[test]
    fn non_commands() {
        assert!(parse_control_command("add a todo please").is_none());
        assert!(parse_control_command("").is_none());
    }

    /// Malformed commands are validation errors with usage text.
    #[test]
    fn malformed_commands() {
        for line in ["/do", "/do x", "/do 1-", "/do until", "/frobnicate", "/pause now"] {
            let err = parse_control_command(line)
                .expect("slash command")
                .expect_err(line);
            assert!(err.downcast_ref::<ValidationError>().is_some(), "{line}");
        }
    }
}
