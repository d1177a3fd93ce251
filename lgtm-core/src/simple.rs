//! Simple (non-strict) review: one approval from any collaborator adds the label.

use crate::codec::{encode_marker, is_invalidation_notice, is_marker, INVALIDATION_NOTICE};
use crate::command::LgtmCommand;
use crate::effect::Effect;
use crate::engine::SELF_APPROVAL_REFUSAL;
use crate::error::Result;
use crate::forge::{Forge, IssueComment, PullRequest};
use crate::identity::Login;
use crate::owners::{OwnersBackend, PathReviewerMap};
use crate::policy::ReviewPolicy;
use crate::state::TreeHash;

pub const COLLABORATOR_REFUSAL: &str = "changing LGTM is restricted to collaborators";
pub const OWNERS_REFUSAL: &str =
    "adding LGTM is restricted to approvers and reviewers in OWNERS files.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The actor may change the label. `assign` asks for the actor to be
    /// assigned to the pull request first.
    Allowed { assign: bool },
    Refused(&'static str),
}

/// Decide whether `actor` may apply `command` to `pull`.
pub async fn admit(
    forge: &dyn Forge,
    owners: &dyn OwnersBackend,
    policy: &ReviewPolicy,
    pull: &PullRequest,
    actor: &Login,
    command: LgtmCommand,
) -> Result<Admission> {
    if actor.same_account(&pull.author) {
        return Ok(match command {
            LgtmCommand::Approve => Admission::Refused(SELF_APPROVAL_REFUSAL),
            _ => Admission::Allowed { assign: false },
        });
    }

    if !policy.skip_collaborators {
        if !forge.is_collaborator(actor).await? {
            return Ok(Admission::Refused(COLLABORATOR_REFUSAL));
        }
        let assigned = pull.assignees.iter().any(|a| a.same_account(actor));
        return Ok(Admission::Allowed { assign: !assigned });
    }

    let files = forge.changed_files(pull.number).await?;
    let view = owners.for_branch(&pull.base_ref);
    let reviewers = PathReviewerMap::resolve(view.as_ref(), &files).await?;
    if !reviewers.is_reviewer(actor) {
        return Ok(Admission::Refused(OWNERS_REFUSAL));
    }
    Ok(Admission::Allowed { assign: false })
}

/// Facts needed to change the label in simple mode.
#[derive(Debug, Clone, Copy)]
pub struct LabelContext<'a> {
    pub policy: &'a ReviewPolicy,
    /// The pull request author is sticky-trusted.
    pub sticky: bool,
    pub fingerprint: Option<&'a TreeHash>,
    pub comments: &'a [IssueComment],
    pub bot: &'a Login,
}

impl LabelContext<'_> {
    fn prune(&self, matches: fn(&str) -> bool) -> impl Iterator<Item = Effect> + '_ {
        self.comments
            .iter()
            .filter(move |c| c.author.same_account(self.bot) && matches(&c.body))
            .map(|c| Effect::DeleteComment { comment_id: c.id })
    }
}

/// Effects of an admitted command. Only a change of label presence does anything.
pub fn label_effects(want_label: bool, label_present: bool, ctx: &LabelContext<'_>) -> Vec<Effect> {
    let mut effects = Vec::new();
    match (want_label, label_present) {
        (false, true) => {
            effects.push(Effect::RemoveLabel);
            if ctx.policy.store_tree_hash {
                effects.extend(ctx.prune(is_marker));
            }
        }
        (true, false) => {
            effects.push(Effect::AddLabel);
            if !ctx.sticky {
                if ctx.policy.store_tree_hash {
                    effects.push(Effect::PostComment {
                        body: encode_marker(ctx.fingerprint),
                    });
                }
                effects.extend(ctx.prune(is_invalidation_notice));
            }
        }
        _ => {}
    }
    effects
}

/// Effects of new commits in simple mode.
///
/// `marker_current` says whether the latest marker comment records the head tree.
pub fn synchronize_effects(
    policy: &ReviewPolicy,
    label_present: bool,
    sticky: bool,
    marker_current: bool,
) -> Vec<Effect> {
    if sticky || !label_present {
        return Vec::new();
    }
    if policy.store_tree_hash && marker_current {
        return Vec::new();
    }
    vec![
        Effect::RemoveLabel,
        Effect::PostComment {
            body: INVALIDATION_NOTICE.to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::InMemoryForge;
    use crate::owners::StaticOwners;
    use crate::state::CommentId;
    use chrono::{TimeZone, Utc};

    fn pull() -> PullRequest {
        PullRequest {
            number: 1,
            author: Login::from("author"),
            head_sha: "c1".to_string(),
            base_ref: "main".to_string(),
            assignees: vec![Login::from("carol")],
            open: true,
            merged: false,
        }
    }

    async fn forge() -> InMemoryForge {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(), &["a/x.go"]).await;
        forge.add_collaborator("carol").await;
        forge.add_collaborator("dave").await;
        forge
    }

    fn bot_comment(id: u64, body: String) -> IssueComment {
        let at = Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap();
        IssueComment {
            id: CommentId(id),
            author: Login::from("bot[bot]"),
            body,
            created_at: at,
            updated_at: at,
        }
    }

    async fn admit_as(forge: &InMemoryForge, who: &str, command: LgtmCommand) -> Admission {
        admit(
            forge,
            &StaticOwners::new(),
            &ReviewPolicy::default(),
            &pull(),
            &Login::from(who),
            command,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_admit_collaborators() {
        let forge = forge().await;

        assert_eq!(
            admit_as(&forge, "author", LgtmCommand::Approve).await,
            Admission::Refused(SELF_APPROVAL_REFUSAL)
        );
        assert_eq!(
            admit_as(&forge, "author", LgtmCommand::Cancel).await,
            Admission::Allowed { assign: false }
        );
        assert_eq!(
            admit_as(&forge, "mallory", LgtmCommand::Approve).await,
            Admission::Refused(COLLABORATOR_REFUSAL)
        );
        assert_eq!(
            admit_as(&forge, "carol", LgtmCommand::Approve).await,
            Admission::Allowed { assign: false }
        );
        assert_eq!(
            admit_as(&forge, "dave", LgtmCommand::Approve).await,
            Admission::Allowed { assign: true }
        );
    }

    #[tokio::test]
    async fn test_admit_through_owners() {
        let forge = forge().await;
        let owners = StaticOwners::new().reviewer("a", "mallory");
        let policy = ReviewPolicy {
            skip_collaborators: true,
            ..ReviewPolicy::default()
        };

        let allowed = admit(
            &forge,
            &owners,
            &policy,
            &pull(),
            &Login::from("mallory"),
            LgtmCommand::Approve,
        )
        .await
        .unwrap();
        assert_eq!(allowed, Admission::Allowed { assign: false });

        let refused = admit(
            &forge,
            &owners,
            &policy,
            &pull(),
            &Login::from("carol"),
            LgtmCommand::Approve,
        )
        .await
        .unwrap();
        assert_eq!(refused, Admission::Refused(OWNERS_REFUSAL));
    }

    #[test]
    fn test_add_label_posts_marker_and_prunes_notices() {
        let policy = ReviewPolicy {
            store_tree_hash: true,
            ..ReviewPolicy::default()
        };
        let bot = Login::from("bot[bot]");
        let tree = TreeHash::from("t1");
        let comments = vec![bot_comment(3, INVALIDATION_NOTICE.to_string())];
        let ctx = LabelContext {
            policy: &policy,
            sticky: false,
            fingerprint: Some(&tree),
            comments: &comments,
            bot: &bot,
        };

        let effects = label_effects(true, false, &ctx);
        assert_eq!(
            effects,
            vec![
                Effect::AddLabel,
                Effect::PostComment {
                    body: encode_marker(Some(&tree)),
                },
                Effect::DeleteComment {
                    comment_id: CommentId(3)
                },
            ]
        );

        let sticky = LabelContext { sticky: true, ..ctx };
        assert_eq!(label_effects(true, false, &sticky), vec![Effect::AddLabel]);
        assert!(label_effects(true, true, &ctx).is_empty());
    }

    #[test]
    fn test_remove_label_prunes_markers() {
        let policy = ReviewPolicy {
            store_tree_hash: true,
            ..ReviewPolicy::default()
        };
        let bot = Login::from("bot[bot]");
        let comments = vec![
            bot_comment(1, encode_marker(Some(&TreeHash::from("t1")))),
            bot_comment(2, "unrelated".to_string()),
        ];
        let ctx = LabelContext {
            policy: &policy,
            sticky: false,
            fingerprint: None,
            comments: &comments,
            bot: &bot,
        };

        assert_eq!(
            label_effects(false, true, &ctx),
            vec![
                Effect::RemoveLabel,
                Effect::DeleteComment {
                    comment_id: CommentId(1)
                },
            ]
        );
        assert!(label_effects(false, false, &ctx).is_empty());
    }

    #[test]
    fn test_synchronize_effects() {
        let policy = ReviewPolicy {
            store_tree_hash: true,
            ..ReviewPolicy::default()
        };
        assert!(synchronize_effects(&policy, false, false, false).is_empty());
        assert!(synchronize_effects(&policy, true, true, false).is_empty());
        assert!(synchronize_effects(&policy, true, false, true).is_empty());
        assert_eq!(
            synchronize_effects(&policy, true, false, false),
            vec![
                Effect::RemoveLabel,
                Effect::PostComment {
                    body: INVALIDATION_NOTICE.to_string()
                },
            ]
        );

        // Without stored hashes every push removes the label.
        let policy = ReviewPolicy::default();
        assert_eq!(synchronize_effects(&policy, true, false, true).len(), 2);
    }
}
