//! Client for the OWNERS cache service.
//!
//! The service answers `POST {base}/approvers` and `POST {base}/reviewers`
//! with the identities the OWNERS files grant for one path on one branch.
//! A path without an entry comes back as an empty `owners` list. Transport
//! failures, error statuses and undecodable bodies fail the lookup.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tracing::error;

use lgtm_core::identity::normalize_login;
use lgtm_core::{LgtmError, OwnersBackend, OwnersView};

use crate::middleware::{create_http_client, CORRELATION_ID_HEADER};

#[derive(Clone)]
pub struct OwnersClient {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct OwnersRequest<'a> {
    platform: &'a str,
    org: &'a str,
    repo: &'a str,
    branch: &'a str,
    file: &'a str,
}

#[derive(Debug, Deserialize)]
struct OwnersResponse {
    #[serde(default)]
    owners: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Approvers,
    Reviewers,
}

impl Role {
    fn endpoint(&self) -> &'static str {
        match self {
            Role::Approvers => "approvers",
            Role::Reviewers => "reviewers",
        }
    }
}

impl OwnersClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: create_http_client("lgtm-bot/0.1.0")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn lookup(
        &self,
        correlation_id: Option<&str>,
        role: Role,
        request: &OwnersRequest<'_>,
    ) -> Result<BTreeSet<String>> {
        let url = format!("{}/{}", self.base_url, role.endpoint());
        let mut request_builder = self.client.post(&url).json(request);
        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        let response = request_builder
            .send()
            .await
            .context("Failed to send OWNERS request")?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OWNERS service error: {} - {}", status, error_text));
        }

        let body: OwnersResponse = response
            .json()
            .await
            .context("Failed to parse OWNERS response")?;
        Ok(normalize_all(body.owners))
    }
}

fn normalize_all(owners: Vec<String>) -> BTreeSet<String> {
    owners.iter().map(|o| normalize_login(o)).collect()
}

/// OWNERS data of one repository, as seen by one webhook delivery.
pub struct RepoOwners<'a> {
    client: &'a OwnersClient,
    org: String,
    repo: String,
    correlation_id: Option<String>,
}

impl<'a> RepoOwners<'a> {
    pub fn new(
        client: &'a OwnersClient,
        org: impl Into<String>,
        repo: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            client,
            org: org.into(),
            repo: repo.into(),
            correlation_id,
        }
    }
}

impl OwnersBackend for RepoOwners<'_> {
    fn for_branch(&self, branch: &str) -> Box<dyn OwnersView + '_> {
        Box::new(BranchOwners {
            owners: self,
            branch: branch.to_string(),
        })
    }
}

struct BranchOwners<'a> {
    owners: &'a RepoOwners<'a>,
    branch: String,
}

impl BranchOwners<'_> {
    async fn lookup(&self, role: Role, path: &str) -> lgtm_core::Result<BTreeSet<String>> {
        let request = OwnersRequest {
            platform: "github",
            org: &self.owners.org,
            repo: &self.owners.repo,
            branch: &self.branch,
            file: path,
        };
        match self
            .owners
            .client
            .lookup(self.owners.correlation_id.as_deref(), role, &request)
            .await
        {
            Ok(owners) => Ok(owners),
            Err(e) => {
                error!(
                    "Failed to load {} of {} in {}/{}@{}: {:#}",
                    role.endpoint(),
                    path,
                    self.owners.org,
                    self.owners.repo,
                    self.branch,
                    e
                );
                Err(LgtmError::Owners {
                    message: format!("{} of {}: {:#}", role.endpoint(), path, e),
                })
            }
        }
    }
}

#[async_trait]
impl OwnersView for BranchOwners<'_> {
    async fn approvers(&self, path: &str) -> lgtm_core::Result<BTreeSet<String>> {
        self.lookup(Role::Approvers, path).await
    }

    async fn reviewers(&self, path: &str) -> lgtm_core::Result<BTreeSet<String>> {
        self.lookup(Role::Reviewers, path).await
    }
}
