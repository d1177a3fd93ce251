//! OWNERS view: who may approve which path.
//!
//! The backend that answers these questions lives outside this crate. A path
//! with no OWNERS entry answers with an empty set, meaning "nobody can approve
//! this path". A backend that cannot answer at all fails the lookup, and the
//! event is abandoned rather than judged against incomplete data.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::{normalize_login, Login};

/// Rendered in place of the empty directory of a file at the repository root.
pub const ROOT_DIR_SENTINEL: &str = "root directory";

/// Authorized identities for paths on one branch of one repository.
#[async_trait]
pub trait OwnersView: Send + Sync {
    /// Normalized approvers for `path`.
    async fn approvers(&self, path: &str) -> Result<BTreeSet<String>>;

    /// Normalized reviewers for `path`.
    async fn reviewers(&self, path: &str) -> Result<BTreeSet<String>>;
}

/// Produces the OWNERS view for the base branch of a pull request.
pub trait OwnersBackend: Send + Sync {
    fn for_branch(&self, branch: &str) -> Box<dyn OwnersView + '_>;
}

/// Map from each changed file to the identities allowed to approve it.
///
/// Computed once per event and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathReviewerMap {
    reviewers: BTreeMap<String, BTreeSet<String>>,
}

impl PathReviewerMap {
    /// Look up every file. Fails as soon as one lookup fails.
    pub async fn resolve<S: AsRef<str>>(view: &dyn OwnersView, files: &[S]) -> Result<Self> {
        let mut reviewers = BTreeMap::new();
        for file in files {
            let file = file.as_ref();
            let mut allowed = view.approvers(file).await?;
            allowed.extend(view.reviewers(file).await?);
            reviewers.insert(file.to_string(), allowed);
        }
        Ok(Self { reviewers })
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<&'static str>)>,
        S: Into<String>,
    {
        Self {
            reviewers: entries
                .into_iter()
                .map(|(path, logins)| {
                    (
                        path.into(),
                        logins.into_iter().map(normalize_login).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn files(&self) -> Vec<&str> {
        self.reviewers.keys().map(String::as_str).collect()
    }

    /// Whether `login` may approve at least one of the changed files.
    pub fn is_reviewer(&self, login: &Login) -> bool {
        let login = login.normalized();
        self.reviewers.values().any(|allowed| allowed.contains(&login))
    }

    /// Files none of whose authorized identities are in `approving`.
    pub fn uncovered_files(&self, approving: &BTreeSet<String>) -> Vec<&str> {
        self.reviewers
            .iter()
            .filter(|(_, allowed)| allowed.is_disjoint(approving))
            .map(|(file, _)| file.as_str())
            .collect()
    }
}

/// Directories containing the given files, with the root shown as
/// [`ROOT_DIR_SENTINEL`].
pub fn changed_dirs<S: AsRef<str>>(files: &[S]) -> BTreeSet<String> {
    files
        .iter()
        .map(|file| match file.as_ref().trim_end_matches('/').rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir.to_string(),
            _ => ROOT_DIR_SENTINEL.to_string(),
        })
        .collect()
}

/// OWNERS data held in memory, keyed by directory.
///
/// A directory's entries apply to every file below it, and the empty
/// directory covers the whole repository.
#[derive(Debug, Clone, Default)]
pub struct StaticOwners {
    approvers: BTreeMap<String, BTreeSet<String>>,
    reviewers: BTreeMap<String, BTreeSet<String>>,
}

impl StaticOwners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approver(mut self, dir: &str, login: &str) -> Self {
        self.approvers
            .entry(dir.trim_matches('/').to_string())
            .or_default()
            .insert(normalize_login(login));
        self
    }

    pub fn reviewer(mut self, dir: &str, login: &str) -> Self {
        self.reviewers
            .entry(dir.trim_matches('/').to_string())
            .or_default()
            .insert(normalize_login(login));
        self
    }

    fn covering(entries: &BTreeMap<String, BTreeSet<String>>, path: &str) -> BTreeSet<String> {
        entries
            .iter()
            .filter(|(dir, _)| covers(dir, path))
            .flat_map(|(_, logins)| logins.iter().cloned())
            .collect()
    }
}

fn covers(dir: &str, path: &str) -> bool {
    dir.is_empty()
        || path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl OwnersView for StaticOwners {
    async fn approvers(&self, path: &str) -> Result<BTreeSet<String>> {
        Ok(Self::covering(&self.approvers, path))
    }

    async fn reviewers(&self, path: &str) -> Result<BTreeSet<String>> {
        Ok(Self::covering(&self.reviewers, path))
    }
}

impl OwnersBackend for StaticOwners {
    fn for_branch(&self, _branch: &str) -> Box<dyn OwnersView + '_> {
        Box::new(self.clone())
    }
}
