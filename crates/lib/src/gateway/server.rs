//! Gateway HTTP server: webhook endpoint and health check (single port).

use crate::channels::{signature::SIGNATURE_HEADER, HandlerRegistry};
use crate::config::{self, Config};
use crate::error::TransportError;
use crate::gateway::dispatch::Dispatcher;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Largest callback body accepted on `POST /webhook`. Larger bodies are
/// rejected with 400 like any other unreadable callback.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    /// Port reported by the health check.
    pub port: u16,
}

/// Build the router: `POST /webhook` and `GET /` (health).
pub fn router(dispatcher: Arc<Dispatcher>, port: u16) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", post(webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(GatewayState { dispatcher, port })
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port and
/// dispatches verified callbacks to `registry`.
/// Fails before binding if the channel secret is missing or the handler timeout is zero.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config, registry: HandlerRegistry) -> Result<()> {
    let secret = config::resolve_channel_secret(&config).unwrap_or_default();
    let timeout = Duration::from_millis(config.channels.line.handler_timeout_ms);
    let handler_names = registry.names();
    let dispatcher = Dispatcher::new(secret, timeout, registry).context(
        "invalid webhook configuration (set channels.line.channelSecret or LINE_CHANNEL_SECRET)",
    )?;
    log::info!(
        "webhook dispatcher ready: {} handler(s) {:?}, handler timeout {:?}",
        handler_names.len(),
        handler_names,
        timeout
    );

    let bind = config.gateway.bind.trim();
    let app = router(Arc::new(dispatcher), config.gateway.port);
    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Handler invocations still running are not awaited.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST /webhook — verifies `X-Line-Signature` over the raw body and decodes the
/// callback. Responds 200 as soon as the body is accepted; handlers run afterwards
/// in their own tasks. Any read, verification or decode failure is 400 and runs nothing.
async fn webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<StatusCode, TransportError> {
    let body = body.map_err(|e| {
        log::warn!("webhook: unreadable body: {}", e);
        TransportError::UnreadableBody(e.body_text())
    })?;
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let envelope = state.dispatcher.verify(&body, provided).map_err(|e| {
        log::warn!("webhook: rejected callback: {}", e);
        e
    })?;
    let received = envelope.events.len();
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let scheduled = dispatcher.dispatch(envelope);
        log::debug!(
            "webhook: {} event(s), {} handler invocation(s) scheduled",
            received,
            scheduled
        );
    });
    Ok(StatusCode::OK)
}

/// GET / returns a simple health JSON (for health checks).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "handlers": state.dispatcher.handler_count(),
    }))
}
