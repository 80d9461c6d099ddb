// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `POST /v1/chat/completions` — the OpenAI-compatible endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::debug;

use crate::adapter;
use crate::coordinator;
use crate::http::error::from_json_rejection;
use crate::http::AppState;
use crate::validate::validate_openai;

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
    let chat = match validate_openai(&body) {
        Ok(chat) => chat,
        Err(e) => return e.for_environment(production).into_response(),
    };

    // The model/temperature/max_tokens knobs have no counterpart in the
    // child; they are accepted for wire compatibility and ignored.
    if let Some(model) = &chat.model {
        debug!(model, "model parameter accepted and ignored");
    }

    let adapted = adapter::adapt(&chat, state.config.stream.show_thinking);
    debug!(
        resume = adapted.request.session_id.is_some(),
        attachments = adapted.attachments.len(),
        "chat-completion request adapted"
    );
    coordinator::handle_openai(state, adapted).await
}
