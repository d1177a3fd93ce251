//! Consensus engine for strict review.
//!
//! One engine owns the [`ReviewState`] of one pull request for the duration of
//! one comment event. Applying a command mutates the state and returns the
//! effects that persist it. No I/O happens here.

use crate::codec::render_reply;
use crate::command::LgtmCommand;
use crate::effect::Effect;
use crate::event::CommentEvent;
use crate::identity::Login;
use crate::label_sync::{sync, write_status_only};
use crate::owners::PathReviewerMap;
use crate::state::{ReviewState, Verdict};

pub const SELF_APPROVAL_REFUSAL: &str = "you cannot LGTM your own PR.";

pub struct ConsensusEngine<'a> {
    state: ReviewState,
    reviewers: &'a PathReviewerMap,
    author: &'a Login,
    label_present: bool,
}

impl<'a> ConsensusEngine<'a> {
    pub fn new(
        state: ReviewState,
        reviewers: &'a PathReviewerMap,
        author: &'a Login,
        label_present: bool,
    ) -> Self {
        Self {
            state,
            reviewers,
            author,
            label_present,
        }
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    pub fn into_state(self) -> ReviewState {
        self.state
    }

    /// Whether `actor` may approve at least one changed file.
    pub fn is_authorized(&self, actor: &Login) -> bool {
        self.reviewers.is_reviewer(actor)
    }

    pub fn apply(&mut self, command: LgtmCommand, event: &CommentEvent) -> Vec<Effect> {
        match command {
            LgtmCommand::Approve => self.approve(event),
            LgtmCommand::Cancel => self.cancel(&event.actor),
            LgtmCommand::NotACommand => Vec::new(),
        }
    }

    fn approve(&mut self, event: &CommentEvent) -> Vec<Effect> {
        let actor = &event.actor;
        if actor.same_account(self.author) {
            return vec![Effect::Reply {
                body: render_reply(
                    actor,
                    SELF_APPROVAL_REFUSAL,
                    &event.body,
                    event.html_url.as_deref(),
                ),
            }];
        }

        if self.state.is_consentor(actor) {
            return Vec::new();
        }

        let authorized = self.is_authorized(actor);
        self.state.add_consentor(actor.clone(), authorized);

        if !authorized {
            return write_status_only(&self.state, self.label_present);
        }

        let approving = self.state.authorized_consentors();
        let uncovered = self.reviewers.uncovered_files(&approving);
        self.state.set_pending_files(&uncovered);

        sync(&self.state, self.state.verdict(), self.label_present)
    }

    fn cancel(&mut self, actor: &Login) -> Vec<Effect> {
        let is_author = actor.same_account(self.author);
        let authorized = self.is_authorized(actor);

        if !is_author && !authorized {
            self.state.add_opponent(actor.clone(), false);
            return write_status_only(&self.state, self.label_present);
        }

        if is_author {
            self.state.clear_votes();
        } else {
            self.state.add_opponent(actor.clone(), true);
        }

        // Which part of the change the reviewer objects to is unknown, so every
        // changed directory needs review again.
        self.state.set_pending_files(&self.reviewers.files());

        sync(&self.state, Verdict::NotLgtm, self.label_present)
    }
}
