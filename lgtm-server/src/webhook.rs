use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use lgtm_core::{CommentEvent, Handler, Login, PrAction, PullRequestEvent};

use crate::github::{InstallationForge, RepoRef};
use crate::middleware::CorrelationId;
use crate::owners::RepoOwners;
use crate::trust::TeamTrust;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub sender: Option<User>,
    pub installation: Option<Installation>,
    pub comment: Option<Comment>,
    pub issue: Option<Issue>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub user: User,
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// A delivery the handlers act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LgtmEvent {
    Comment(CommentEvent),
    PullRequest(PullRequestEvent),
}

type HmacSha256 = Hmac<Sha256>;

pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId::new();

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

/// Turn a delivery into an event, or `None` when there is nothing to do.
pub fn parse_event(event_name: &str, payload: &GitHubWebhookPayload) -> Option<LgtmEvent> {
    match event_name {
        "issue_comment" => {
            if payload.action.as_deref() != Some("created") {
                return None;
            }
            let issue = payload.issue.as_ref()?;
            // Comments on plain issues carry no pull_request link
            issue.pull_request.as_ref()?;
            let comment = payload.comment.as_ref()?;
            Some(LgtmEvent::Comment(CommentEvent {
                pr_number: issue.number,
                actor: Login::from(comment.user.login.as_str()),
                body: comment.body.clone(),
                html_url: comment.html_url.clone(),
            }))
        }
        "pull_request" => {
            let action = PrAction::from_webhook_action(payload.action.as_deref()?);
            if action == PrAction::Other {
                return None;
            }
            Some(LgtmEvent::PullRequest(PullRequestEvent {
                pr_number: payload.pull_request.as_ref()?.number,
                action,
            }))
        }
        _ => None,
    }
}

fn event_name(headers: &HeaderMap) -> &str {
    headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

fn respond(message: impl Into<String>) -> Json<WebhookResponse> {
    Json(WebhookResponse {
        message: message.into(),
    })
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let event_name = event_name(&parts.headers);
    info!("Received {} webhook", event_name);

    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    let Some(event) = parse_event(event_name, &payload) else {
        return Ok(respond("Event ignored"));
    };

    let (Some(repository), Some(installation)) = (&payload.repository, &payload.installation)
    else {
        warn!("Missing repository or installation info, ignoring event");
        return Ok(respond("Event ignored"));
    };

    let org = repository.owner.login.as_str();
    let Some(policy) = state.policies.policy_for(org, &repository.name) else {
        info!("No LGTM policy for {}, ignoring event", repository.full_name);
        return Ok(respond("Repository not configured"));
    };

    let repo = RepoRef {
        installation_id: installation.id,
        owner: org.to_string(),
        name: repository.name.clone(),
    };
    let forge = InstallationForge::new(&state.github_client, repo.clone(), correlation_id.clone());
    let owners = RepoOwners::new(
        &state.owners_client,
        org,
        repository.name.as_str(),
        correlation_id.clone(),
    );
    let trust = TeamTrust::new(
        &state.github_client,
        repo,
        policy.sticky_lgtm_team.clone(),
        correlation_id,
    );
    let handler = Handler::new(&forge, &owners, &trust, policy);

    let result = match &event {
        LgtmEvent::Comment(comment) => handler.handle_comment(comment).await,
        LgtmEvent::PullRequest(pr) => handler.handle_pull_request(pr).await,
    };

    match result {
        Ok(()) => Ok(respond("Event processed")),
        Err(e) => {
            error!(
                "Failed to handle {} event for {}: {}",
                event_name, repository.full_name, e
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
