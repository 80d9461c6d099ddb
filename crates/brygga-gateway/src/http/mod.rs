// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP surface assembly: routes, middleware layering, serve loop.
//!
//! Route map:
//! - `GET  /health`               — open, never authenticated
//! - `POST /api/claude`           — bearer auth (when configured)
//! - `POST /v1/chat/completions`  — bearer auth (when configured)
//! - anything else                — 404 envelope

pub mod auth;
pub mod error;
pub mod health;
pub mod native;
pub mod openai;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use brygga_config::Config;
use brygga_core::ActiveRegistry;
use brygga_mcp::McpRegistry;

use self::auth::AuthState;
use self::error::ApiError;

/// Shared, cheaply cloneable application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub mcp: Arc<McpRegistry>,
    pub registry: ActiveRegistry,
    pub auth: AuthState,
    pub started: std::time::Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, mcp: Arc<McpRegistry>, registry: ActiveRegistry) -> Self {
        let auth = AuthState::with_defaults(config.auth.api_keys.clone());
        Self {
            config,
            mcp,
            registry,
            auth,
            started: std::time::Instant::now(),
        }
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/claude", post(native::handler))
        .route("/v1/chat/completions", post(openai::handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::bearer_auth_mw,
        ));

    Router::new()
        .route("/health", get(health::handler))
        .merge(protected)
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(state.config.http.body_limit_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn fallback() -> ApiError {
    ApiError::not_found("Unknown route")
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server")?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
