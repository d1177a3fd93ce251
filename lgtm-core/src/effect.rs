//! Effects (side effects as data).
//!
//! The engine never talks to the forge directly. It returns a list of effects
//! and the interpreter in [`crate::handler`] executes them in order, stopping
//! at the first failure.

use std::fmt;

use crate::identity::Login;
use crate::state::CommentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the status comment, or overwrite it in place when `comment_id` is set.
    WriteStatus {
        comment_id: Option<CommentId>,
        body: String,
    },

    /// Reply to a command that was refused.
    Reply { body: String },

    /// Post a bot comment that is not the status comment (markers and notices).
    PostComment { body: String },

    DeleteComment { comment_id: CommentId },

    AddLabel,

    RemoveLabel,

    /// Assign a collaborator to the pull request. Failure is logged, not fatal.
    Assign { login: Login },
}

impl Effect {
    /// Whether this effect mutates the label.
    pub fn is_label_change(&self) -> bool {
        matches!(self, Effect::AddLabel | Effect::RemoveLabel)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::WriteStatus {
                comment_id: Some(id),
                ..
            } => write!(f, "update status comment {}", id),
            Effect::WriteStatus {
                comment_id: None, ..
            } => write!(f, "create status comment"),
            Effect::Reply { .. } => write!(f, "reply"),
            Effect::PostComment { .. } => write!(f, "post comment"),
            Effect::DeleteComment { comment_id } => write!(f, "delete comment {}", comment_id),
            Effect::AddLabel => write!(f, "add label"),
            Effect::RemoveLabel => write!(f, "remove label"),
            Effect::Assign { login } => write!(f, "assign {}", login),
        }
    }
}
