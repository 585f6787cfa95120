//! Slash command parsing for the interactive run loop.

use colloquy_types::session::RecoveryStrategy;
use console::style;

#[derive(Debug, PartialEq)]
pub enum RunCommand {
    Help,
    Quit,
    /// Start (or resume) the chain.
    Start,
    Cancel,
    Recover(RecoveryStrategy),
    /// Select a choice option by token.
    Choose(String),
    /// Show the stored session.
    Status,
    /// Unknown command or bad argument, with a message for the user.
    Unknown(String),
}

/// Parse user input as a slash command. `None` if it is not one.
pub fn parse(input: &str) -> Option<RunCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    let command = match (cmd.as_str(), arg) {
        ("/help" | "/h" | "/?", _) => RunCommand::Help,
        ("/quit" | "/exit" | "/q", _) => RunCommand::Quit,
        ("/start", _) => RunCommand::Start,
        ("/cancel", _) => RunCommand::Cancel,
        ("/status", _) => RunCommand::Status,
        ("/recover", Some(arg)) => match arg.parse() {
            Ok(strategy) => RunCommand::Recover(strategy),
            Err(e) => RunCommand::Unknown(e),
        },
        ("/recover", None) => RunCommand::Unknown(
            "/recover requires a strategy (continue, retry, restart, cancel)".to_string(),
        ),
        ("/choose", Some(token)) => RunCommand::Choose(token.to_string()),
        ("/choose", None) => RunCommand::Unknown("/choose requires an option token".to_string()),
        (other, _) => RunCommand::Unknown(format!("unknown command {other}")),
    };
    Some(command)
}

pub fn help_text() -> String {
    let rows = [
        ("/start", "Start or resume the chain"),
        ("/choose <token>", "Pick an option"),
        ("/recover <strategy>", "continue, retry, restart or cancel"),
        ("/cancel", "Cancel the dialog"),
        ("/status", "Show the stored session"),
        ("/quit", "Leave (the session stays stored)"),
    ];
    let mut out = format!("\n  {}\n\n", style("Available commands:").bold());
    for (cmd, what) in rows {
        out.push_str(&format!("  {:<22} {what}\n", style(cmd).cyan()));
    }
    out.push_str(&format!(
        "\n  {}\n",
        style("Typing an option token or a recovery strategy works too.").dim()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_not_command() {
        assert_eq!(parse("hello world"), None);
        assert_eq!(parse("  Alice "), None);
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse("/quit"), Some(RunCommand::Quit));
        assert_eq!(parse("/exit"), Some(RunCommand::Quit));
        assert_eq!(parse("/Q"), Some(RunCommand::Quit));
    }

    #[test]
    fn test_parse_recover() {
        assert_eq!(
            parse("/recover Retry"),
            Some(RunCommand::Recover(RecoveryStrategy::Retry))
        );
        assert!(matches!(parse("/recover later"), Some(RunCommand::Unknown(_))));
        assert!(matches!(parse("/recover"), Some(RunCommand::Unknown(_))));
    }

    #[test]
    fn test_parse_choose_keeps_token_case() {
        assert_eq!(parse("/choose Pro"), Some(RunCommand::Choose("Pro".into())));
        assert!(matches!(parse("/choose   "), Some(RunCommand::Unknown(_))));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse("/foo bar"),
            Some(RunCommand::Unknown("unknown command /foo".into()))
        );
    }
}
