pub mod config;
pub mod github;
pub mod middleware;
pub mod owners;
pub mod trust;
pub mod webhook;

use std::sync::Arc;

use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use config::{Config, PolicyFile};
pub use github::GitHubClient;
pub use owners::OwnersClient;

pub struct AppState {
    pub github_client: GitHubClient,
    pub owners_client: OwnersClient,
    pub webhook_secret: String,
    pub policies: PolicyFile,
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "lgtm"
    })))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(webhook::webhook_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
