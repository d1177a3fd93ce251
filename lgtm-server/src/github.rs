use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info};

use lgtm_core::{CommentId, Forge, IssueComment, LgtmError, Login, PullRequest, TreeHash};

use crate::middleware::{create_http_client, CORRELATION_ID_HEADER};

const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_base: String,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
    bot_login: Arc<OnceCell<String>>,
}

/// The repository an installation token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub installation_id: u64,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    fn url(&self, api_base: &str, rest: &str) -> String {
        format!("{}/repos/{}/{}/{}", api_base, self.owner, self.name, rest)
    }
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct LabelsRequest<'a> {
    labels: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct AssigneesRequest<'a> {
    assignees: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub user: GitHubUser,
    pub head: PullRequestRefResponse,
    pub base: PullRequestRefResponse,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
struct FileChange {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    tree: Option<TreeRef>,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
pub struct Team {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Result<Self> {
        Ok(Self {
            client: create_http_client("lgtm-bot/0.1.0")?,
            api_base: GITHUB_API.to_string(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
            bot_login: Arc::new(OnceCell::new()),
        })
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Reuse the cached token while it has more than five minutes left
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;
        let response = check_status(response, "installation token request").await?;

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    /// An authenticated request against the installation of `repo`.
    async fn request(
        &self,
        method: Method,
        url: &str,
        correlation_id: Option<&str>,
        repo: &RepoRef,
    ) -> Result<RequestBuilder> {
        let token = self.get_installation_token(repo.installation_id).await?;
        let mut request_builder = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json");

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }
        Ok(request_builder)
    }

    /// GET every page of a list endpoint.
    async fn get_paginated<T: serde::de::DeserializeOwned>(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        url: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let paged = format!("{}?page={}&per_page={}", url, page, PER_PAGE);
            let response = self
                .request(Method::GET, &paged, correlation_id, repo)
                .await?
                .send()
                .await
                .with_context(|| format!("Failed to send {} request", what))?;
            let response = check_status(response, what).await?;

            let items: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", what))?;
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn get_pull_request(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<PullRequestResponse> {
        let url = repo.url(&self.api_base, &format!("pulls/{}", pr_number));
        let response = self
            .request(Method::GET, &url, correlation_id, repo)
            .await?
            .send()
            .await
            .context("Failed to send pull request request")?;
        let response = check_status(response, "pull request").await?;

        response
            .json()
            .await
            .context("Failed to parse pull request response")
    }

    pub async fn get_pr_files(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<String>> {
        let url = repo.url(&self.api_base, &format!("pulls/{}/files", pr_number));
        let files: Vec<FileChange> = self
            .get_paginated(correlation_id, repo, &url, "PR files")
            .await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    pub async fn get_pr_comments(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<Comment>> {
        let url = repo.url(&self.api_base, &format!("issues/{}/comments", pr_number));
        let comments: Vec<Comment> = self
            .get_paginated(correlation_id, repo, &url, "PR comments")
            .await?;
        info!(
            "Found {} total comments on PR #{}",
            comments.len(),
            pr_number
        );
        Ok(comments)
    }

    pub async fn post_pr_comment(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
        comment_body: &str,
    ) -> Result<Comment> {
        let url = repo.url(&self.api_base, &format!("issues/{}/comments", pr_number));
        info!(
            "Posting comment to PR #{} in {}/{}",
            pr_number, repo.owner, repo.name
        );

        let response = self
            .request(Method::POST, &url, correlation_id, repo)
            .await?
            .json(&CommentRequest { body: comment_body })
            .send()
            .await
            .context("Failed to send PR comment request")?;
        let response = check_status(response, "create comment").await?;

        let comment: Comment = response
            .json()
            .await
            .context("Failed to parse comment response")?;
        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment)
    }

    pub async fn update_comment(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        comment_id: u64,
        comment_body: &str,
    ) -> Result<()> {
        let url = repo.url(&self.api_base, &format!("issues/comments/{}", comment_id));
        let response = self
            .request(Method::PATCH, &url, correlation_id, repo)
            .await?
            .json(&CommentRequest { body: comment_body })
            .send()
            .await
            .context("Failed to send update comment request")?;
        check_status(response, "update comment").await?;
        info!("Successfully updated comment {}", comment_id);
        Ok(())
    }

    pub async fn delete_comment(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        comment_id: u64,
    ) -> Result<()> {
        let url = repo.url(&self.api_base, &format!("issues/comments/{}", comment_id));
        let response = self
            .request(Method::DELETE, &url, correlation_id, repo)
            .await?
            .send()
            .await
            .context("Failed to send delete comment request")?;
        check_status(response, "delete comment").await?;
        Ok(())
    }

    pub async fn get_labels(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<String>> {
        let url = repo.url(&self.api_base, &format!("issues/{}/labels", pr_number));
        let labels: Vec<LabelResponse> = self
            .get_paginated(correlation_id, repo, &url, "labels")
            .await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    pub async fn add_label(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
        label: &str,
    ) -> Result<()> {
        let url = repo.url(&self.api_base, &format!("issues/{}/labels", pr_number));
        let response = self
            .request(Method::POST, &url, correlation_id, repo)
            .await?
            .json(&LabelsRequest { labels: [label] })
            .send()
            .await
            .context("Failed to send add label request")?;
        check_status(response, "add label").await?;
        Ok(())
    }

    pub async fn remove_label(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
        label: &str,
    ) -> Result<()> {
        let url = label_url(&repo.url(&self.api_base, &format!("issues/{}/labels", pr_number)), label)?;
        let response = self
            .request(Method::DELETE, url.as_str(), correlation_id, repo)
            .await?
            .send()
            .await
            .context("Failed to send remove label request")?;
        check_status(response, "remove label").await?;
        Ok(())
    }

    /// Tree hash of a commit, or `None` when the commit data has no tree.
    pub async fn get_commit_tree(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        sha: &str,
    ) -> Result<Option<String>> {
        let url = repo.url(&self.api_base, &format!("commits/{}", sha));
        let response = self
            .request(Method::GET, &url, correlation_id, repo)
            .await?
            .send()
            .await
            .context("Failed to send commit request")?;
        let response = check_status(response, "commit").await?;

        let commit: CommitResponse = response
            .json()
            .await
            .context("Failed to parse commit response")?;
        Ok(commit.commit.tree.map(|t| t.sha))
    }

    pub async fn is_collaborator(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        login: &str,
    ) -> Result<bool> {
        let url = repo.url(&self.api_base, &format!("collaborators/{}", login));
        let response = self
            .request(Method::GET, &url, correlation_id, repo)
            .await?
            .send()
            .await
            .context("Failed to send collaborator request")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                check_status(response, "collaborator check").await?;
                Ok(true)
            }
        }
    }

    pub async fn assign(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        pr_number: u64,
        login: &str,
    ) -> Result<()> {
        let url = repo.url(&self.api_base, &format!("issues/{}/assignees", pr_number));
        let response = self
            .request(Method::POST, &url, correlation_id, repo)
            .await?
            .json(&AssigneesRequest { assignees: [login] })
            .send()
            .await
            .context("Failed to send assign request")?;
        check_status(response, "assign").await?;
        Ok(())
    }

    pub async fn list_teams(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        org: &str,
    ) -> Result<Vec<Team>> {
        let url = format!("{}/orgs/{}/teams", self.api_base, org);
        self.get_paginated(correlation_id, repo, &url, "teams").await
    }

    pub async fn list_team_members(
        &self,
        correlation_id: Option<&str>,
        repo: &RepoRef,
        org: &str,
        team_slug: &str,
    ) -> Result<Vec<String>> {
        let url = format!("{}/orgs/{}/teams/{}/members", self.api_base, org, team_slug);
        let members: Vec<GitHubUser> = self
            .get_paginated(correlation_id, repo, &url, "team members")
            .await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    /// The login the app comments as: `<app-slug>[bot]`.
    pub async fn get_bot_user(&self) -> Result<String> {
        self.bot_login
            .get_or_try_init(|| async {
                let url = format!("{}/app", self.api_base);
                let jwt = self.generate_jwt()?;
                let response = self
                    .client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", jwt))
                    .header("Accept", "application/vnd.github.v3+json")
                    .send()
                    .await
                    .context("Failed to send app info request")?;
                let response = check_status(response, "app info").await?;

                let app_info: AppInfoResponse = response
                    .json()
                    .await
                    .context("Failed to parse app info response")?;
                Ok::<_, anyhow::Error>(format!("{}[bot]", app_info.slug))
            })
            .await
            .cloned()
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .context("Failed to read error response body")?;
    error!("GitHub API error ({}): {} - {}", what, status, error_text);
    Err(anyhow!(
        "GitHub API error ({}): {} - {}",
        what,
        status,
        error_text
    ))
}

fn label_url(labels_url: &str, label: &str) -> Result<Url> {
    let mut url = Url::parse(labels_url).context("Invalid labels URL")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Labels URL cannot be a base"))?
        .push(label);
    Ok(url)
}

/// `Forge` bound to one repository and one webhook delivery.
pub struct InstallationForge<'a> {
    client: &'a GitHubClient,
    repo: RepoRef,
    correlation_id: Option<String>,
}

impl<'a> InstallationForge<'a> {
    pub fn new(client: &'a GitHubClient, repo: RepoRef, correlation_id: Option<String>) -> Self {
        Self {
            client,
            repo,
            correlation_id,
        }
    }

    fn cid(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

fn forge_error(operation: &'static str) -> impl FnOnce(anyhow::Error) -> LgtmError {
    move |e| LgtmError::forge(operation, format!("{:#}", e))
}

#[async_trait]
impl Forge for InstallationForge<'_> {
    async fn bot_identity(&self) -> lgtm_core::Result<Login> {
        self.client
            .get_bot_user()
            .await
            .map(Login::from)
            .map_err(forge_error("bot_identity"))
    }

    async fn pull_request(&self, number: u64) -> lgtm_core::Result<PullRequest> {
        let pr = self
            .client
            .get_pull_request(self.cid(), &self.repo, number)
            .await
            .map_err(forge_error("pull_request"))?;
        Ok(PullRequest {
            number: pr.number,
            author: Login::from(pr.user.login),
            head_sha: pr.head.sha,
            base_ref: pr.base.ref_name,
            assignees: pr.assignees.into_iter().map(|u| Login::from(u.login)).collect(),
            open: pr.state == "open",
            merged: pr.merged,
        })
    }

    async fn changed_files(&self, number: u64) -> lgtm_core::Result<Vec<String>> {
        self.client
            .get_pr_files(self.cid(), &self.repo, number)
            .await
            .map_err(forge_error("changed_files"))
    }

    async fn comments(&self, number: u64) -> lgtm_core::Result<Vec<IssueComment>> {
        let comments = self
            .client
            .get_pr_comments(self.cid(), &self.repo, number)
            .await
            .map_err(forge_error("comments"))?;
        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                id: CommentId(c.id),
                author: Login::from(c.user.login),
                body: c.body,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect())
    }

    async fn create_comment(&self, number: u64, body: &str) -> lgtm_core::Result<CommentId> {
        self.client
            .post_pr_comment(self.cid(), &self.repo, number, body)
            .await
            .map(|c| CommentId(c.id))
            .map_err(forge_error("create_comment"))
    }

    async fn update_comment(&self, comment_id: CommentId, body: &str) -> lgtm_core::Result<()> {
        self.client
            .update_comment(self.cid(), &self.repo, comment_id.0, body)
            .await
            .map_err(forge_error("update_comment"))
    }

    async fn delete_comment(&self, comment_id: CommentId) -> lgtm_core::Result<()> {
        self.client
            .delete_comment(self.cid(), &self.repo, comment_id.0)
            .await
            .map_err(forge_error("delete_comment"))
    }

    async fn labels(&self, number: u64) -> lgtm_core::Result<Vec<String>> {
        self.client
            .get_labels(self.cid(), &self.repo, number)
            .await
            .map_err(forge_error("labels"))
    }

    async fn add_label(&self, number: u64, label: &str) -> lgtm_core::Result<()> {
        self.client
            .add_label(self.cid(), &self.repo, number, label)
            .await
            .map_err(forge_error("add_label"))
    }

    async fn remove_label(&self, number: u64, label: &str) -> lgtm_core::Result<()> {
        self.client
            .remove_label(self.cid(), &self.repo, number, label)
            .await
            .map_err(forge_error("remove_label"))
    }

    async fn tree_hash(&self, sha: &str) -> lgtm_core::Result<TreeHash> {
        self.client
            .get_commit_tree(self.cid(), &self.repo, sha)
            .await
            .map_err(forge_error("tree_hash"))?
            .map(TreeHash::from)
            .ok_or_else(|| LgtmError::MissingTree {
                sha: sha.to_string(),
            })
    }

    async fn is_collaborator(&self, login: &Login) -> lgtm_core::Result<bool> {
        self.client
            .is_collaborator(self.cid(), &self.repo, login.as_str())
            .await
            .map_err(forge_error("is_collaborator"))
    }

    async fn assign(&self, number: u64, login: &Login) -> lgtm_core::Result<()> {
        self.client
            .assign(self.cid(), &self.repo, number, login.as_str())
            .await
            .map_err(forge_error("assign"))
    }
}
