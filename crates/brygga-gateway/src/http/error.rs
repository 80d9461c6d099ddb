// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP error envelopes.
//!
//! Two shapes, depending on where in the request lifecycle the failure
//! happens:
//!
//! - before the response is hijacked for streaming, a plain JSON body with
//!   an HTTP status:
//!   `{"error":{"message","type","code","requestId","timestamp","details"?}}`
//! - after SSE streaming has started, a single `data:` frame:
//!   `{"type":"error","error":{"message","type","code","timestamp","requestId"}}`
//!
//! Request-scoped failures never take the process down; everything funnels
//! into one of these two shapes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

/// A classified, client-facing error.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Taxonomy kind, e.g. `validation_error`.
    pub kind: &'static str,
    /// Machine-readable code, e.g. `conflicting_tool_permissions`.
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    pub request_id: Uuid,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            code: code.to_string(),
            message: message.into(),
            details: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn validation(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", code, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "invalid_api_key",
            message,
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_error",
            "too_many_requests",
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "unknown_route", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "validation_error",
            "payload_too_large",
            message,
        )
    }

    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "process_error",
            "spawn_failed",
            message,
        )
    }

    pub fn child_timeout(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "timeout_error",
            "child_timeout",
            message,
        )
    }

    pub fn workspace(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "workspace_error",
            "workspace_failure",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "system_error",
            "internal_error",
            message,
        )
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Strip details in production so internals never leak to clients.
    pub fn for_environment(mut self, production: bool) -> Self {
        if production {
            self.details = None;
        }
        self
    }

    /// Non-streaming body.
    pub fn body(&self) -> Value {
        let mut error = json!({
            "message": self.message,
            "type": self.kind,
            "code": self.code,
            "requestId": self.request_id.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        json!({ "error": error })
    }

    /// Streaming frame payload (the part after `data: `).
    pub fn stream_payload(&self) -> String {
        json!({
            "type": "error",
            "error": {
                "message": self.message,
                "type": self.kind,
                "code": self.code,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "requestId": self.request_id.to_string(),
            }
        })
        .to_string()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

/// Map a Json extractor rejection to the envelope shape.  Oversized bodies
/// keep their 413; everything else is a 400 validation failure.
pub fn from_json_rejection(rejection: axum::extract::rejection::JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Request body exceeds the configured limit")
    } else {
        ApiError::validation("invalid_json", rejection.body_text())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
