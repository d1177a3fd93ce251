//! Review-consensus engine for the `/lgtm` pull request label.
//!
//! Reviewers post `/lgtm` and `/lgtm cancel`. The engine checks them against
//! the OWNERS data for the changed files, keeps the consensus in a single bot
//! comment and converges the label with it. New commits that change the tree
//! invalidate prior approvals.

pub mod codec;
pub mod command;
pub mod effect;
pub mod engine;
pub mod error;
pub mod event;
pub mod forge;
pub mod handler;
pub mod identity;
pub mod label_sync;
pub mod owners;
pub mod policy;
pub mod simple;
pub mod staleness;
pub mod state;

pub use command::{classify, LgtmCommand};
pub use effect::Effect;
pub use error::{LgtmError, Result};
pub use event::{CommentEvent, PrAction, PullRequestEvent};
pub use forge::{Forge, InMemoryForge, IssueComment, NoTrust, PullRequest, TrustPolicy, TrustedAuthors};
pub use handler::Handler;
pub use identity::Login;
pub use owners::{OwnersBackend, OwnersView, PathReviewerMap, StaticOwners};
pub use policy::ReviewPolicy;
pub use state::{CommentId, ReviewState, TreeHash, Verdict};
