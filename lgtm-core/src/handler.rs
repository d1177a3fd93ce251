//! Event handlers and the effect interpreter.
//!
//! A handler gathers the facts an event needs from the forge, asks the pure
//! parts of the crate what to do, and executes the resulting effects in order.
//! Every fatal forge failure stops the event at that point; nothing is retried.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::{locate, render_reply, TamperCheck};
use crate::command::{classify, LgtmCommand};
use crate::effect::Effect;
use crate::engine::ConsensusEngine;
use crate::error::Result;
use crate::event::{CommentEvent, PrAction, PullRequestEvent};
use crate::forge::{Forge, IssueComment, PullRequest, TrustPolicy};
use crate::label_sync::sync;
use crate::owners::{OwnersBackend, PathReviewerMap};
use crate::policy::ReviewPolicy;
use crate::simple::{admit, label_effects, synchronize_effects, Admission, LabelContext};
use crate::staleness::{current_fingerprint, marker_is_current, restore, strict_synchronize};
use crate::state::{ReviewState, Verdict};

/// Handles events for one repository.
pub struct Handler<'a> {
    forge: &'a dyn Forge,
    owners: &'a dyn OwnersBackend,
    trust: &'a dyn TrustPolicy,
    policy: &'a ReviewPolicy,
}

impl<'a> Handler<'a> {
    pub fn new(
        forge: &'a dyn Forge,
        owners: &'a dyn OwnersBackend,
        trust: &'a dyn TrustPolicy,
        policy: &'a ReviewPolicy,
    ) -> Self {
        Self {
            forge,
            owners,
            trust,
            policy,
        }
    }

    pub async fn handle_comment(&self, event: &CommentEvent) -> Result<()> {
        let command = classify(&event.body);
        if !command.is_command() {
            return Ok(());
        }

        let start = Instant::now();
        info!(
            "Handling {} from {} on PR #{}",
            command, event.actor, event.pr_number
        );

        let pull = self.forge.pull_request(event.pr_number).await?;
        if !pull.open || pull.merged {
            info!("PR #{} is not open, ignoring {}", pull.number, command);
            return Ok(());
        }

        let effects = if self.policy.strict_review {
            self.strict_comment(&pull, command, event).await?
        } else {
            self.simple_comment(&pull, command, event).await?
        };
        self.execute(pull.number, effects).await?;

        debug!(
            "Handled {} on PR #{} in {:?}",
            command,
            pull.number,
            start.elapsed()
        );
        Ok(())
    }

    pub async fn handle_pull_request(&self, event: &PullRequestEvent) -> Result<()> {
        if event.action == PrAction::Other {
            return Ok(());
        }

        let start = Instant::now();
        let pull = self.forge.pull_request(event.pr_number).await?;
        if !pull.open || pull.merged {
            info!("PR #{} is not open, ignoring {:?}", pull.number, event.action);
            return Ok(());
        }

        let effects = if self.policy.strict_review {
            self.strict_pull_request(&pull, event.action).await?
        } else if event.action == PrAction::Synchronize {
            self.simple_synchronize(&pull).await?
        } else {
            Vec::new()
        };
        self.execute(pull.number, effects).await?;

        debug!(
            "Handled {:?} on PR #{} in {:?}",
            event.action,
            pull.number,
            start.elapsed()
        );
        Ok(())
    }

    // =========================================================================
    // Strict review
    // =========================================================================

    async fn strict_comment(
        &self,
        pull: &PullRequest,
        command: LgtmCommand,
        event: &CommentEvent,
    ) -> Result<Vec<Effect>> {
        let fingerprint = current_fingerprint(self.forge, &pull.head_sha).await?;
        let bot = self.forge.bot_identity().await?;
        let comments = self.sorted_comments(pull.number).await?;
        let files = self.forge.changed_files(pull.number).await?;

        let view = self.owners.for_branch(&pull.base_ref);
        let reviewers = PathReviewerMap::resolve(view.as_ref(), &files).await?;
        let label_present = self.label_present(pull.number).await?;

        // The bot edits its status comment in place, so only authorship is checked.
        let located = locate(&comments, &bot, fingerprint.as_ref(), TamperCheck::AuthorOnly);
        let state = restore(located, fingerprint, &files);

        let mut engine = ConsensusEngine::new(state, &reviewers, &pull.author, label_present);
        let effects = engine.apply(command, event);
        debug!(
            "Pending directories on PR #{}: {:?}",
            pull.number,
            engine.state().pending_dirs()
        );
        Ok(effects)
    }

    async fn strict_pull_request(&self, pull: &PullRequest, action: PrAction) -> Result<Vec<Effect>> {
        let fingerprint = current_fingerprint(self.forge, &pull.head_sha).await?;
        let files = self.forge.changed_files(pull.number).await?;
        let label_present = self.label_present(pull.number).await?;

        match action {
            PrAction::Opened => {
                let state = ReviewState::fresh(fingerprint, &files);
                Ok(sync(&state, Verdict::NotLgtm, label_present))
            }
            PrAction::Synchronize => {
                let bot = self.forge.bot_identity().await?;
                let comments = self.sorted_comments(pull.number).await?;
                let located =
                    locate(&comments, &bot, fingerprint.as_ref(), TamperCheck::AuthorOnly);
                let effects = strict_synchronize(located, fingerprint, &files, label_present);
                if effects.is_empty() {
                    info!("Tree of PR #{} is unchanged, keeping consensus", pull.number);
                }
                Ok(effects)
            }
            PrAction::Other => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Simple review
    // =========================================================================

    async fn simple_comment(
        &self,
        pull: &PullRequest,
        command: LgtmCommand,
        event: &CommentEvent,
    ) -> Result<Vec<Effect>> {
        let assign = match admit(
            self.forge,
            self.owners,
            self.policy,
            pull,
            &event.actor,
            command,
        )
        .await?
        {
            Admission::Refused(reason) => {
                info!("Refusing {} from {}: {}", command, event.actor, reason);
                return Ok(vec![Effect::Reply {
                    body: render_reply(
                        &event.actor,
                        reason,
                        &event.body,
                        event.html_url.as_deref(),
                    ),
                }]);
            }
            Admission::Allowed { assign } => assign,
        };

        let mut effects = Vec::new();
        if assign {
            effects.push(Effect::Assign {
                login: event.actor.clone(),
            });
        }

        let want_label = command == LgtmCommand::Approve;
        let label_present = self.label_present(pull.number).await?;
        if want_label == label_present {
            return Ok(effects);
        }

        let sticky = want_label && self.trust.is_trusted_author(&pull.author).await;
        let fingerprint = if want_label && !sticky && self.policy.store_tree_hash {
            current_fingerprint(self.forge, &pull.head_sha).await?
        } else {
            None
        };
        let bot = self.forge.bot_identity().await?;
        let comments = self.sorted_comments(pull.number).await?;

        let ctx = LabelContext {
            policy: self.policy,
            sticky,
            fingerprint: fingerprint.as_ref(),
            comments: &comments,
            bot: &bot,
        };
        effects.extend(label_effects(want_label, label_present, &ctx));
        Ok(effects)
    }

    async fn simple_synchronize(&self, pull: &PullRequest) -> Result<Vec<Effect>> {
        if self.trust.is_trusted_author(&pull.author).await {
            info!(
                "Author of PR #{} is trusted, skipping tree hash verification",
                pull.number
            );
            return Ok(Vec::new());
        }

        let label_present = self.label_present(pull.number).await?;
        if !label_present {
            return Ok(Vec::new());
        }

        let marker_current = if self.policy.store_tree_hash {
            let bot = self.forge.bot_identity().await?;
            let comments = self.sorted_comments(pull.number).await?;
            let fingerprint = current_fingerprint(self.forge, &pull.head_sha).await?;
            marker_is_current(&comments, &bot, fingerprint.as_ref())
        } else {
            false
        };
        if marker_current {
            info!(
                "Keeping {} label on PR #{}, tree hash is unchanged",
                self.policy.label, pull.number
            );
        }

        Ok(synchronize_effects(self.policy, label_present, false, marker_current))
    }

    // =========================================================================
    // Facts and effects
    // =========================================================================

    async fn label_present(&self, number: u64) -> Result<bool> {
        let labels = self.forge.labels(number).await?;
        Ok(self.policy.has_label(&labels))
    }

    async fn sorted_comments(&self, number: u64) -> Result<Vec<IssueComment>> {
        let mut comments = self.forge.comments(number).await?;
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    /// Execute effects in order. Stops at the first fatal failure.
    pub async fn execute(&self, number: u64, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            debug!("PR #{}: {}", number, effect);
            match effect {
                Effect::WriteStatus {
                    comment_id: Some(comment_id),
                    body,
                } => self.forge.update_comment(comment_id, &body).await?,
                Effect::WriteStatus {
                    comment_id: None,
                    body,
                } => {
                    let comment_id = self.forge.create_comment(number, &body).await?;
                    info!("Created status comment {} on PR #{}", comment_id, number);
                }
                Effect::Reply { body } | Effect::PostComment { body } => {
                    self.forge.create_comment(number, &body).await?;
                }
                Effect::DeleteComment { comment_id } => {
                    if let Err(e) = self.forge.delete_comment(comment_id).await {
                        warn!("Failed to prune comment {} on PR #{}: {}", comment_id, number, e);
                    }
                }
                Effect::AddLabel => {
                    info!("Adding {} label to PR #{}", self.policy.label, number);
                    self.forge.add_label(number, &self.policy.label).await?;
                }
                Effect::RemoveLabel => {
                    info!("Removing {} label from PR #{}", self.policy.label, number);
                    self.forge.remove_label(number, &self.policy.label).await?;
                }
                Effect::Assign { login } => {
                    if let Err(e) = self.forge.assign(number, &login).await {
                        warn!("Failed to assign PR #{} to {}: {}", number, login, e);
                    }
                }
            }
        }
        Ok(())
    }
}
