use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use lgtm_server::{app, AppState, Config, GitHubClient, OwnersClient, PolicyFile};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    info!("Starting LGTM bot");

    let policies = PolicyFile::load(&config.policy_path)?;
    info!(
        "Loaded {} policy entries from {}",
        policies.config_items.len(),
        config.policy_path.display()
    );

    let app_state = Arc::new(AppState {
        github_client: GitHubClient::new(config.github_app_id, config.github_private_key)?,
        owners_client: OwnersClient::new(config.owners_service_url)?,
        webhook_secret: config.github_webhook_secret,
        policies,
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app(app_state)).await?;

    Ok(())
}
