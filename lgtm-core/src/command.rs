//! Command classification for `/lgtm` comments.

use std::fmt;

/// What a comment asks the bot to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LgtmCommand {
    /// `/lgtm` or `/lgtm no-issue`
    Approve,
    /// `/lgtm cancel`
    Cancel,
    /// Anything else. Causes no state change.
    NotACommand,
}

impl LgtmCommand {
    pub fn is_command(&self) -> bool {
        !matches!(self, LgtmCommand::NotACommand)
    }
}

impl fmt::Display for LgtmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LgtmCommand::Approve => write!(f, "/lgtm"),
            LgtmCommand::Cancel => write!(f, "/lgtm cancel"),
            LgtmCommand::NotACommand => write!(f, "(not a command)"),
        }
    }
}

/// Classify a comment body.
///
/// A command must occupy a whole line on its own (surrounding whitespace is
/// ignored, case is not significant). Any line of the body may carry it. When a
/// body holds both an approval and a cancellation, the approval wins.
pub fn classify(body: &str) -> LgtmCommand {
    let lines: Vec<String> = body.lines().map(|l| l.trim().to_lowercase()).collect();

    if lines
        .iter()
        .any(|line| line == "/lgtm" || is_lgtm_no_issue(line))
    {
        return LgtmCommand::Approve;
    }

    if lines.iter().any(|line| is_lgtm_cancel(line)) {
        return LgtmCommand::Cancel;
    }

    LgtmCommand::NotACommand
}

fn is_lgtm_no_issue(line: &str) -> bool {
    line.strip_prefix("/lgtm ")
        .is_some_and(|rest| rest.trim_start() == "no-issue")
}

fn is_lgtm_cancel(line: &str) -> bool {
    line.strip_prefix("/lgtm ")
        .is_some_and(|rest| rest.trim_start() == "cancel")
}
