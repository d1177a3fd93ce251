//! Inbound events, already decoded from the forge's webhook payloads.

use crate::identity::Login;

/// A comment posted on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub pr_number: u64,
    pub actor: Login,
    pub body: String,
    /// Link to the comment, quoted in replies.
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrAction {
    Opened,
    Synchronize,
    Other,
}

impl PrAction {
    pub fn from_webhook_action(action: &str) -> Self {
        match action {
            "opened" => PrAction::Opened,
            "synchronize" => PrAction::Synchronize,
            _ => PrAction::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub pr_number: u64,
    pub action: PrAction,
}
