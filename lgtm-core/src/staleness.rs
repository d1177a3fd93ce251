//! Deciding whether recorded approvals still apply to the current head.
//!
//! The fingerprint is the head commit's tree hash, not its commit hash: a
//! rebase or squash that leaves the content alone keeps the tree hash, so
//! approvals survive it.

use tracing::warn;

use crate::codec::{latest_marker_hash, Located};
use crate::effect::Effect;
use crate::error::{LgtmError, Result};
use crate::forge::{Forge, IssueComment};
use crate::identity::Login;
use crate::label_sync::sync;
use crate::state::{ReviewState, TreeHash, Verdict};

/// Tree hash of `head_sha`. A commit without a tree yields `None`, which
/// never matches any recorded fingerprint.
pub async fn current_fingerprint(forge: &dyn Forge, head_sha: &str) -> Result<Option<TreeHash>> {
    match forge.tree_hash(head_sha).await {
        Ok(tree) => Ok(Some(tree)),
        Err(LgtmError::MissingTree { sha }) => {
            warn!("Commit {} has no tree hash, treating prior approvals as stale", sha);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// The state to work on for this event.
///
/// A current state is used as is. A stale one is replaced by a fresh state
/// over `changed_files` that reuses its comment, and a missing one by a fresh
/// state with no comment yet.
pub fn restore<S: AsRef<str>>(
    located: Located,
    fingerprint: Option<TreeHash>,
    changed_files: &[S],
) -> ReviewState {
    match located {
        Located::Current(state) => state,
        Located::Stale(state) => {
            ReviewState::fresh(fingerprint, changed_files).with_comment_id(state.comment_id())
        }
        Located::Missing => ReviewState::fresh(fingerprint, changed_files),
    }
}

/// Effects of new commits in strict mode.
///
/// Nothing happens when the recorded tree matches. Otherwise consensus starts
/// over: the status comment is rewritten with no votes and the label goes.
pub fn strict_synchronize<S: AsRef<str>>(
    located: Located,
    fingerprint: Option<TreeHash>,
    changed_files: &[S],
    label_present: bool,
) -> Vec<Effect> {
    if matches!(located, Located::Current(_)) {
        return Vec::new();
    }
    let state = restore(located, fingerprint, changed_files);
    sync(&state, Verdict::NotLgtm, label_present)
}

/// Whether the label added in simple mode still describes the head tree.
pub fn marker_is_current(
    comments: &[IssueComment],
    bot: &Login,
    fingerprint: Option<&TreeHash>,
) -> bool {
    match (latest_marker_hash(comments, bot), fingerprint) {
        (Some(recorded), Some(current)) => &recorded == current,
        _ => false,
    }
}
