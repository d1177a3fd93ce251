//! The persisted consensus record for one pull request revision.
//!
//! Consentors and opponents live in a single map from normalized identity to
//! [`Vote`], so an account can never hold both stances at once, whatever
//! spelling it used. The spelling of the latest vote is kept for display.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::identity::Login;
use crate::owners::changed_dirs;

/// Newtype for a commit's tree hash (the content fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeHash(pub String);

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TreeHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TreeHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Newtype for a forge comment ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommentId(pub u64);

impl From<u64> for CommentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stance {
    Consenting,
    Opposing,
}

/// One identity's recorded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub stance: Stance,
    /// Whether the identity is an OWNERS approver or reviewer for any changed file.
    pub authorized: bool,
}

/// Overall outcome rendered into the status comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Lgtm,
    NotLgtm,
}

impl Verdict {
    pub fn is_lgtm(&self) -> bool {
        matches!(self, Verdict::Lgtm)
    }
}

impl From<bool> for Verdict {
    fn from(lgtm: bool) -> Self {
        if lgtm {
            Verdict::Lgtm
        } else {
            Verdict::NotLgtm
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ballot {
    login: Login,
    vote: Vote,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReviewState {
    votes: BTreeMap<String, Ballot>,
    pending_dirs: BTreeSet<String>,
    fingerprint: Option<TreeHash>,
    comment_id: Option<CommentId>,
}

impl ReviewState {
    /// A state with no votes in which every changed directory still needs review.
    pub fn fresh<S: AsRef<str>>(fingerprint: Option<TreeHash>, changed_files: &[S]) -> Self {
        Self {
            votes: BTreeMap::new(),
            pending_dirs: changed_dirs(changed_files),
            fingerprint,
            comment_id: None,
        }
    }

    /// Later votes of the same account replace earlier ones.
    pub(crate) fn from_parts(
        votes: impl IntoIterator<Item = (Login, Vote)>,
        pending_dirs: BTreeSet<String>,
        fingerprint: Option<TreeHash>,
    ) -> Self {
        let mut state = Self {
            votes: BTreeMap::new(),
            pending_dirs,
            fingerprint,
            comment_id: None,
        };
        for (login, vote) in votes {
            state.record(login, vote);
        }
        state
    }

    pub fn with_comment_id(mut self, comment_id: Option<CommentId>) -> Self {
        self.comment_id = comment_id;
        self
    }

    pub fn comment_id(&self) -> Option<CommentId> {
        self.comment_id
    }

    pub fn fingerprint(&self) -> Option<&TreeHash> {
        self.fingerprint.as_ref()
    }

    pub fn pending_dirs(&self) -> &BTreeSet<String> {
        &self.pending_dirs
    }

    pub fn vote_of(&self, login: &Login) -> Option<Vote> {
        self.votes.get(&login.normalized()).map(|ballot| ballot.vote)
    }

    pub fn is_consentor(&self, login: &Login) -> bool {
        matches!(
            self.vote_of(login),
            Some(Vote {
                stance: Stance::Consenting,
                ..
            })
        )
    }

    pub fn consentors(&self) -> impl Iterator<Item = (&Login, bool)> {
        self.with_stance(Stance::Consenting)
    }

    pub fn opponents(&self) -> impl Iterator<Item = (&Login, bool)> {
        self.with_stance(Stance::Opposing)
    }

    fn with_stance(&self, stance: Stance) -> impl Iterator<Item = (&Login, bool)> {
        self.votes
            .values()
            .filter(move |ballot| ballot.vote.stance == stance)
            .map(|ballot| (&ballot.login, ballot.vote.authorized))
    }

    /// Normalized identities of consentors who count as OWNERS reviewers.
    pub fn authorized_consentors(&self) -> BTreeSet<String> {
        self.consentors()
            .filter(|(_, authorized)| *authorized)
            .map(|(login, _)| login.normalized())
            .collect()
    }

    pub fn has_authorized_opponent(&self) -> bool {
        self.opponents().any(|(_, authorized)| authorized)
    }

    /// No directory awaits review and no authorized reviewer objects.
    pub fn is_fully_reviewed(&self) -> bool {
        self.pending_dirs.is_empty() && !self.has_authorized_opponent()
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from(self.is_fully_reviewed())
    }

    pub fn add_consentor(&mut self, login: Login, authorized: bool) {
        self.record(
            login,
            Vote {
                stance: Stance::Consenting,
                authorized,
            },
        );
    }

    pub fn add_opponent(&mut self, login: Login, authorized: bool) {
        self.record(
            login,
            Vote {
                stance: Stance::Opposing,
                authorized,
            },
        );
    }

    fn record(&mut self, login: Login, vote: Vote) {
        self.votes.insert(login.normalized(), Ballot { login, vote });
    }

    pub fn clear_votes(&mut self) {
        self.votes.clear();
    }

    pub fn set_pending_dirs(&mut self, dirs: BTreeSet<String>) {
        self.pending_dirs = dirs;
    }

    /// Recompute pending directories from the given changed files.
    pub fn set_pending_files<S: AsRef<str>>(&mut self, files: &[S]) {
        self.pending_dirs = changed_dirs(files);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_pends_every_directory() {
        let state = ReviewState::fresh(Some(TreeHash::from("t1")), &["a/x.go", "b/y.go", "a/z.go"]);
        let dirs: Vec<&str> = state.pending_dirs().iter().map(String::as_str).collect();
        assert_eq!(dirs, vec!["a", "b"]);
        assert_eq!(state.comment_id(), None);
        assert!(!state.is_fully_reviewed());
    }

    #[test]
    fn test_consent_then_oppose_moves_identity() {
        let mut state = ReviewState::default();
        state.add_consentor(Login::from("alice"), true);
        state.add_opponent(Login::from("alice"), true);

        assert_eq!(state.consentors().count(), 0);
        assert_eq!(state.opponents().count(), 1);
        assert!(state.has_authorized_opponent());
    }

    #[test]
    fn test_unauthorized_opponent_does_not_block() {
        let mut state = ReviewState::default();
        state.add_opponent(Login::from("mallory"), false);
        assert!(state.is_fully_reviewed());
        assert_eq!(state.verdict(), Verdict::Lgtm);
    }

    #[test]
    fn test_votes_follow_the_account_not_the_spelling() {
        let mut state = ReviewState::default();
        state.add_consentor(Login::from("Alice"), true);

        assert!(state.is_consentor(&Login::from("@alice")));
        assert_eq!(
            state.vote_of(&Login::from("ALICE")).map(|v| v.authorized),
            Some(true)
        );

        state.add_opponent(Login::from("alice"), true);
        assert_eq!(state.consentors().count(), 0);
        let opponents: Vec<_> = state.opponents().collect();
        assert_eq!(opponents, vec![(&Login::from("alice"), true)]);
    }

    #[test]
    fn test_authorized_consentors_are_normalized() {
        let mut state = ReviewState::default();
        state.add_consentor(Login::from("Alice"), true);
        state.add_consentor(Login::from("carol"), false);

        let authorized = state.authorized_consentors();
        assert_eq!(authorized.len(), 1);
        assert!(authorized.contains("alice"));
    }
}
