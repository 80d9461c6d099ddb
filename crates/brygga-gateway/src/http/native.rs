// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `POST /api/claude` — the native pass-through endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::debug;

use crate::coordinator;
use crate::http::error::from_json_rejection;
use crate::http::AppState;
use crate::validate::validate_native;

pub async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let production = state.config.log.is_production();
    let body = match payload {
        Ok(Json(v)) => v,
        Err(rejection) => {
            return from_json_rejection(rejection)
                .for_environment(production)
                .into_response()
        }
    };
    match validate_native(&body) {
        Ok(request) => {
            debug!(
                workspace = request.workspace.as_deref().unwrap_or("(shared)"),
                resume = request.session_id.is_some(),
                "native request admitted"
            );
            coordinator::handle_native(state, request).await
        }
        Err(e) => e.for_environment(production).into_response(),
    }
}
