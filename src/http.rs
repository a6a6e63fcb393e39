//! Streamable HTTP transport
//!
//! Serves the MCP endpoint at `/mcp` next to a `/health` check. Every HTTP
//! session gets a clone of the same [`EmailServer`], so all of them share
//! one mailbox session.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::server::EmailServer;

pub const DEFAULT_ADDR: &str = "localhost:8080";

/// Build the HTTP router
///
/// Cancelling `shutdown` also terminates all live MCP sessions.
pub fn router(server: EmailServer, shutdown: &CancellationToken) -> Router {
    let mut config = StreamableHttpServerConfig::default();
    config.cancellation_token = shutdown.child_token();
    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    );

    Router::new()
        .route("/health", get(health))
        .nest_service("/mcp", mcp)
}

/// Bind `addr` and serve until `shutdown` is cancelled
pub async fn serve(server: EmailServer, addr: &str, shutdown: CancellationToken) -> AppResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Connection(format!("failed to bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| AppError::Connection(format!("failed to read bound address: {e}")))?;
    info!(addr = %local, "serving MCP over streamable HTTP at /mcp");

    let app = router(server, &shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await
        .map_err(|e| AppError::Internal(format!("http server failed: {e}")))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::router;
    use crate::config::ServerConfig;
    use crate::server::EmailServer;
    use crate::testing::FakeStore;

    fn app() -> axum::Router {
        let vars: HashMap<&str, &str> = [("IMAP_USERNAME", "me@example.com"), ("IMAP_PASSWORD", "x")]
            .into_iter()
            .collect();
        let config = ServerConfig::load_with(|key| {
            vars.get(key)
                .map(|v| (*v).to_owned())
                .ok_or(VarError::NotPresent)
        })
        .expect("config");
        let server = EmailServer::with_connector(&config, FakeStore::new().connector());
        router(server, &CancellationToken::new())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn unsupported_verb_is_method_not_allowed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
