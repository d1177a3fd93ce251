//! In-memory implementation of `Forge`.
//!
//! Holds pull requests, comments and labels in maps behind a `RwLock`. Comment
//! timestamps come from a logical clock so that a created comment has equal
//! created/updated times and every edit moves `updated_at` forward.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::RwLock;

use super::{Forge, IssueComment, PullRequest};
use crate::error::{LgtmError, Result};
use crate::identity::Login;
use crate::state::{CommentId, TreeHash};

#[derive(Debug, Clone)]
struct StoredPull {
    pull: PullRequest,
    files: Vec<String>,
    labels: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    clock: i64,
    next_comment_id: u64,
    pulls: HashMap<u64, StoredPull>,
    comments: Vec<(u64, IssueComment)>,
    commit_trees: HashMap<String, Option<TreeHash>>,
    collaborators: HashSet<String>,
    failing: HashSet<&'static str>,
}

impl Inner {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_default()
            + Duration::seconds(self.clock)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(LgtmError::forge(operation, "injected failure"));
        }
        Ok(())
    }

    fn pull_mut(&mut self, operation: &'static str, number: u64) -> Result<&mut StoredPull> {
        self.pulls
            .get_mut(&number)
            .ok_or_else(|| LgtmError::forge(operation, format!("pull request #{number} not found")))
    }

    fn pull(&self, operation: &'static str, number: u64) -> Result<&StoredPull> {
        self.pulls
            .get(&number)
            .ok_or_else(|| LgtmError::forge(operation, format!("pull request #{number} not found")))
    }

    fn insert_comment(&mut self, number: u64, author: Login, body: &str) -> CommentId {
        self.next_comment_id += 1;
        let id = CommentId(self.next_comment_id);
        let now = self.tick();
        self.comments.push((
            number,
            IssueComment {
                id,
                author,
                body: body.to_string(),
                created_at: now,
                updated_at: now,
            },
        ));
        id
    }
}

/// A single repository held in memory. All state is lost on drop.
pub struct InMemoryForge {
    bot: Login,
    inner: RwLock<Inner>,
}

impl InMemoryForge {
    pub fn new(bot: impl Into<Login>) -> Self {
        Self {
            bot: bot.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn add_pull_request<S: AsRef<str>>(&self, pull: PullRequest, files: &[S]) {
        let mut inner = self.inner.write().await;
        inner.pulls.insert(
            pull.number,
            StoredPull {
                pull,
                files: files.iter().map(|f| f.as_ref().to_string()).collect(),
                labels: BTreeSet::new(),
            },
        );
    }

    /// Move the head of a pull request to a new commit.
    pub async fn set_head<S: AsRef<str>>(&self, number: u64, sha: &str, files: &[S]) {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.pulls.get_mut(&number) {
            stored.pull.head_sha = sha.to_string();
            stored.files = files.iter().map(|f| f.as_ref().to_string()).collect();
        }
    }

    /// Record the tree of a commit. `None` models commit data without a tree.
    pub async fn set_commit_tree(&self, sha: &str, tree: Option<TreeHash>) {
        let mut inner = self.inner.write().await;
        inner.commit_trees.insert(sha.to_string(), tree);
    }

    pub async fn add_collaborator(&self, login: &str) {
        let mut inner = self.inner.write().await;
        inner.collaborators.insert(Login::from(login).normalized());
    }

    /// Post a comment as someone other than the bot.
    pub async fn post_comment_as(&self, number: u64, author: &str, body: &str) -> CommentId {
        let mut inner = self.inner.write().await;
        inner.insert_comment(number, Login::from(author), body)
    }

    /// Edit a comment without going through the `Forge` API.
    pub async fn edit_comment(&self, comment_id: CommentId, body: &str) {
        let mut inner = self.inner.write().await;
        let now = inner.tick();
        if let Some((_, comment)) = inner.comments.iter_mut().find(|(_, c)| c.id == comment_id) {
            comment.body = body.to_string();
            comment.updated_at = now;
        }
    }

    pub async fn set_label(&self, number: u64, label: &str) {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.pulls.get_mut(&number) {
            stored.labels.insert(label.to_string());
        }
    }

    /// Make every later call of `operation` fail.
    pub async fn fail_operation(&self, operation: &'static str) {
        let mut inner = self.inner.write().await;
        inner.failing.insert(operation);
    }

    pub async fn comments_on(&self, number: u64) -> Vec<IssueComment> {
        let inner = self.inner.read().await;
        inner
            .comments
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Comments on `number` authored by the bot, oldest first.
    pub async fn bot_comments(&self, number: u64) -> Vec<IssueComment> {
        self.comments_on(number)
            .await
            .into_iter()
            .filter(|c| c.author.same_account(&self.bot))
            .collect()
    }

    pub async fn has_label(&self, number: u64, label: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .pulls
            .get(&number)
            .is_some_and(|stored| stored.labels.contains(label))
    }

    pub async fn assignees(&self, number: u64) -> Vec<Login> {
        let inner = self.inner.read().await;
        inner
            .pulls
            .get(&number)
            .map(|stored| stored.pull.assignees.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Forge for InMemoryForge {
    async fn bot_identity(&self) -> Result<Login> {
        self.inner.read().await.check("bot_identity")?;
        Ok(self.bot.clone())
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest> {
        let inner = self.inner.read().await;
        inner.check("pull_request")?;
        Ok(inner.pull("pull_request", number)?.pull.clone())
    }

    async fn changed_files(&self, number: u64) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        inner.check("changed_files")?;
        Ok(inner.pull("changed_files", number)?.files.clone())
    }

    async fn comments(&self, number: u64) -> Result<Vec<IssueComment>> {
        self.inner.read().await.check("comments")?;
        Ok(self.comments_on(number).await)
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<CommentId> {
        let mut inner = self.inner.write().await;
        inner.check("create_comment")?;
        inner.pull("create_comment", number)?;
        Ok(inner.insert_comment(number, self.bot.clone(), body))
    }

    async fn update_comment(&self, comment_id: CommentId, body: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check("update_comment")?;
        let now = inner.tick();
        let (_, comment) = inner
            .comments
            .iter_mut()
            .find(|(_, c)| c.id == comment_id)
            .ok_or_else(|| {
                LgtmError::forge("update_comment", format!("comment {comment_id} not found"))
            })?;
        comment.body = body.to_string();
        comment.updated_at = now;
        Ok(())
    }

    async fn delete_comment(&self, comment_id: CommentId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check("delete_comment")?;
        let before = inner.comments.len();
        inner.comments.retain(|(_, c)| c.id != comment_id);
        if inner.comments.len() == before {
            return Err(LgtmError::forge(
                "delete_comment",
                format!("comment {comment_id} not found"),
            ));
        }
        Ok(())
    }

    async fn labels(&self, number: u64) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        inner.check("labels")?;
        Ok(inner.pull("labels", number)?.labels.iter().cloned().collect())
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check("add_label")?;
        inner
            .pull_mut("add_label", number)?
            .labels
            .insert(label.to_string());
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check("remove_label")?;
        if !inner.pull_mut("remove_label", number)?.labels.remove(label) {
            return Err(LgtmError::forge(
                "remove_label",
                format!("label {label} not present on #{number}"),
            ));
        }
        Ok(())
    }

    async fn tree_hash(&self, sha: &str) -> Result<TreeHash> {
        let inner = self.inner.read().await;
        inner.check("tree_hash")?;
        match inner.commit_trees.get(sha) {
            Some(Some(tree)) => Ok(tree.clone()),
            Some(None) => Err(LgtmError::MissingTree {
                sha: sha.to_string(),
            }),
            None => Err(LgtmError::forge("tree_hash", format!("commit {sha} not found"))),
        }
    }

    async fn is_collaborator(&self, login: &Login) -> Result<bool> {
        let inner = self.inner.read().await;
        inner.check("is_collaborator")?;
        Ok(inner.collaborators.contains(&login.normalized()))
    }

    async fn assign(&self, number: u64, login: &Login) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.check("assign")?;
        let stored = inner.pull_mut("assign", number)?;
        if !stored.pull.assignees.iter().any(|a| a.same_account(login)) {
            stored.pull.assignees.push(login.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull(number: u64) -> PullRequest {
        PullRequest {
            number,
            author: Login::from("author"),
            head_sha: "head1".to_string(),
            base_ref: "main".to_string(),
            assignees: Vec::new(),
            open: true,
            merged: false,
        }
    }

    #[tokio::test]
    async fn test_created_comment_is_unedited_until_updated() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(1), &["a/x.go"]).await;

        let id = forge.create_comment(1, "hello").await.unwrap();
        let comments = forge.comments(1).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].is_unedited());
        assert_eq!(comments[0].author, Login::from("bot[bot]"));

        forge.update_comment(id, "changed").await.unwrap();
        let comments = forge.comments(1).await.unwrap();
        assert_eq!(comments[0].body, "changed");
        assert!(!comments[0].is_unedited());
    }

    #[tokio::test]
    async fn test_comments_are_oldest_first() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(1), &["a/x.go"]).await;
        forge.post_comment_as(1, "alice", "first").await;
        forge.create_comment(1, "second").await.unwrap();

        let comments = forge.comments(1).await.unwrap();
        let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert!(comments[0].created_at < comments[1].created_at);
    }

    #[tokio::test]
    async fn test_labels() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(1), &["a/x.go"]).await;

        forge.add_label(1, "lgtm").await.unwrap();
        assert_eq!(forge.labels(1).await.unwrap(), vec!["lgtm".to_string()]);
        forge.remove_label(1, "lgtm").await.unwrap();
        assert!(!forge.has_label(1, "lgtm").await);
        assert!(forge.remove_label(1, "lgtm").await.is_err());
    }

    #[tokio::test]
    async fn test_tree_hash_anomaly() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.set_commit_tree("c1", Some(TreeHash::from("t1"))).await;
        forge.set_commit_tree("c2", None).await;

        assert_eq!(forge.tree_hash("c1").await.unwrap(), TreeHash::from("t1"));
        assert!(matches!(
            forge.tree_hash("c2").await,
            Err(LgtmError::MissingTree { .. })
        ));
        assert!(matches!(
            forge.tree_hash("c3").await,
            Err(LgtmError::Forge { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(1), &["a/x.go"]).await;
        forge.fail_operation("add_label").await;

        let err = forge.add_label(1, "lgtm").await.unwrap_err();
        assert!(matches!(
            err,
            LgtmError::Forge {
                operation: "add_label",
                ..
            }
        ));
        assert!(!forge.has_label(1, "lgtm").await);
    }

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let forge = InMemoryForge::new("bot[bot]");
        forge.add_pull_request(pull(1), &["a/x.go"]).await;
        forge.assign(1, &Login::from("alice")).await.unwrap();
        forge.assign(1, &Login::from("Alice")).await.unwrap();
        assert_eq!(forge.assignees(1).await, vec![Login::from("alice")]);
    }
}
