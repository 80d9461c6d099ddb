// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP bearer-token authentication middleware and per-IP rate limiting.
//!
//! # Token authentication
//!
//! When API keys are configured (API_KEY / API_KEYS), every streaming
//! endpoint requires a valid bearer token:
//! ```text
//! Authorization: Bearer <token>
//! ```
//! Comparison uses [`subtle::ConstantTimeEq`] to prevent timing oracles.
//! An empty key set disables authentication entirely — the health endpoint
//! is always open either way.
//!
//! # Rate limiting
//!
//! Uses the `governor` crate (GCRA algorithm) for per-IP rate limiting.
//! Only **failed** authentication attempts consume rate-limit tokens;
//! legitimate clients are never throttled by their own traffic.
//!
//! Loopback addresses (127.0.0.1, ::1) are exempt from rate limiting because
//! a local process that has access to the loopback already has local access
//! to the machine anyway.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::http::error::ApiError;
use crate::http::AppState;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Shared auth state threaded through axum middleware.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<Vec<String>>,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    /// Build auth state from the configured key set.
    ///
    /// `max_per_minute`: maximum failed auth attempts before lockout.
    /// `burst`: how many attempts are allowed in a burst before the rate
    /// limit kicks in.
    pub fn new(keys: Vec<String>, max_per_minute: u32, burst: u32) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(max_per_minute).expect("max_per_minute must be > 0"))
                .allow_burst(NonZeroU32::new(burst).expect("burst must be > 0"));

        Self {
            keys: Arc::new(keys),
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Default configuration: 5 attempts per minute, burst of 2.
    pub fn with_defaults(keys: Vec<String>) -> Self {
        Self::new(keys, 5, 2)
    }

    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Constant-time membership check across all configured keys.
    ///
    /// Every key is compared even after a match so the timing profile does
    /// not reveal which key (if any) matched.
    pub fn verify(&self, token: &str) -> bool {
        let mut matched = false;
        for key in self.keys.iter() {
            if key.as_bytes().ct_eq(token.as_bytes()).into() {
                matched = true;
            }
        }
        matched
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Axum middleware that verifies the bearer token for streaming endpoints.
///
/// Returns `401 Unauthorized` on missing/wrong token, `429 Too Many Requests`
/// when the failed-attempt rate limit is exceeded.
pub async fn bearer_auth_mw(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let auth = &state.auth;
    if !auth.enabled() {
        return next.run(req).await;
    }

    match extract_bearer(req.headers()) {
        Some(token) if auth.verify(token) => {
            // Successful auth: do NOT consume a rate-limit token.
            next.run(req).await
        }
        _ => {
            // Without connection info (e.g. in-process tests) treat the
            // caller as loopback.
            let ip = addr
                .map(|ConnectInfo(a)| a.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            // Failed auth: consume a rate-limit token for this IP.
            // Loopback is exempt so local dev tools are never locked out.
            if !is_loopback(ip) && auth.limiter.check_key(&ip).is_err() {
                warn!(%ip, "rate limit exceeded after repeated auth failures");
                return (
                    [(axum::http::header::RETRY_AFTER, "60")],
                    ApiError::rate_limited("Too many failed authentication attempts"),
                )
                    .into_response();
            }
            warn!(%ip, "authentication failed");
            ApiError::authentication("Missing or invalid bearer token").into_response()
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    auth.strip_prefix("Bearer ")
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
