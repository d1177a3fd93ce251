//! Outbound HTTP plumbing shared by the GitHub and OWNERS clients.

use std::time::Instant;

use anyhow::{Context, Result};
use axum::http;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use tracing::debug;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Identifies one webhook delivery across every request it causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamps every request with a correlation id and logs it at debug level.
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let correlation_id = match req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            Some(existing) => existing.to_string(),
            None => {
                let id = extensions
                    .get::<CorrelationId>()
                    .cloned()
                    .unwrap_or_default()
                    .0;
                if let Ok(value) = id.parse() {
                    req.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                id
            }
        };

        let method = req.method().clone();
        let path = req.url().path().to_string();
        let start = Instant::now();

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => debug!(
                "[{}] {} {} -> {} in {:?}",
                correlation_id,
                method,
                path,
                resp.status(),
                start.elapsed()
            ),
            Err(e) => debug!(
                "[{}] {} {} failed after {:?}: {}",
                correlation_id,
                method,
                path,
                start.elapsed(),
                e
            ),
        }

        response
    }
}

pub fn create_http_client(user_agent: &str) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(user_agent)
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client).with(CorrelationMiddleware).build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.0.len(), 36);
    }

    #[test]
    fn test_create_http_client() {
        assert!(create_http_client("lgtm-test").is_ok());
    }
}
