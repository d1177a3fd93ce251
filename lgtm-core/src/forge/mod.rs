//! Forge abstraction.
//!
//! This module defines the `Forge` trait: the handful of pull request, comment
//! and label operations the engine needs. Implementations are bound to a single
//! repository. Every method is one network round trip; none of them retry.

mod memory;

pub use memory::InMemoryForge;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::identity::Login;
use crate::state::{CommentId, TreeHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub author: Login,
    pub head_sha: String,
    pub base_ref: String,
    pub assignees: Vec<Login>,
    pub open: bool,
    pub merged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub id: CommentId,
    pub author: Login,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueComment {
    /// True when nobody edited the comment after it was posted.
    pub fn is_unedited(&self) -> bool {
        self.updated_at == self.created_at
    }
}

#[async_trait]
pub trait Forge: Send + Sync {
    /// The account the bot posts as.
    async fn bot_identity(&self) -> Result<Login>;

    async fn pull_request(&self, number: u64) -> Result<PullRequest>;

    /// Paths touched by the pull request.
    async fn changed_files(&self, number: u64) -> Result<Vec<String>>;

    /// All comments on the pull request, oldest first.
    async fn comments(&self, number: u64) -> Result<Vec<IssueComment>>;

    async fn create_comment(&self, number: u64, body: &str) -> Result<CommentId>;

    async fn update_comment(&self, comment_id: CommentId, body: &str) -> Result<()>;

    async fn delete_comment(&self, comment_id: CommentId) -> Result<()>;

    async fn labels(&self, number: u64) -> Result<Vec<String>>;

    async fn add_label(&self, number: u64, label: &str) -> Result<()>;

    async fn remove_label(&self, number: u64, label: &str) -> Result<()>;

    /// Tree hash of a commit. Fails with `LgtmError::MissingTree` when the
    /// commit data carries no tree.
    async fn tree_hash(&self, sha: &str) -> Result<TreeHash>;

    async fn is_collaborator(&self, login: &Login) -> Result<bool>;

    async fn assign(&self, number: u64, login: &Login) -> Result<()>;
}

/// Decides whether an author's approvals survive new commits.
#[async_trait]
pub trait TrustPolicy: Send + Sync {
    async fn is_trusted_author(&self, author: &Login) -> bool;
}

/// Nobody is trusted; every content change invalidates approval.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrust;

#[async_trait]
impl TrustPolicy for NoTrust {
    async fn is_trusted_author(&self, _author: &Login) -> bool {
        false
    }
}

/// A fixed set of trusted authors.
#[derive(Debug, Clone, Default)]
pub struct TrustedAuthors(pub Vec<Login>);

#[async_trait]
impl TrustPolicy for TrustedAuthors {
    async fn is_trusted_author(&self, author: &Login) -> bool {
        self.0.iter().any(|trusted| trusted.same_account(author))
    }
}
