//! Converging the label and the status comment with a verdict.

use crate::codec::encode;
use crate::effect::Effect;
use crate::state::{ReviewState, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelChange {
    Add,
    Remove,
}

impl From<LabelChange> for Effect {
    fn from(change: LabelChange) -> Self {
        match change {
            LabelChange::Add => Effect::AddLabel,
            LabelChange::Remove => Effect::RemoveLabel,
        }
    }
}

/// The label mutation needed to make label presence agree with `verdict`.
pub fn converge(verdict: Verdict, label_present: bool) -> Option<LabelChange> {
    match (verdict, label_present) {
        (Verdict::Lgtm, false) => Some(LabelChange::Add),
        (Verdict::NotLgtm, true) => Some(LabelChange::Remove),
        _ => None,
    }
}

/// Rewrite the status comment, then converge the label.
///
/// The status comment always comes first so that a failed comment write never
/// leaves a label the comment does not explain.
pub fn sync(state: &ReviewState, verdict: Verdict, label_present: bool) -> Vec<Effect> {
    let mut effects = vec![write_status(state, verdict)];
    effects.extend(converge(verdict, label_present).map(Effect::from));
    effects
}

/// Rewrite the status comment only. The rendered verdict mirrors the label.
pub fn write_status_only(state: &ReviewState, label_present: bool) -> Vec<Effect> {
    vec![write_status(state, Verdict::from(label_present))]
}

fn write_status(state: &ReviewState, verdict: Verdict) -> Effect {
    Effect::WriteStatus {
        comment_id: state.comment_id(),
        body: encode(state, verdict),
    }
}
