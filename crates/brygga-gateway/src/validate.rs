// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Request admission: bounds, charsets, and cross-field rules.
//!
//! Everything here runs before any workspace or process work, so a rejected
//! request costs nothing but the parse.  Errors carry the offending field
//! and value in `details` to make client debugging possible without server
//! log access.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use brygga_core::NormalizedRequest;

use crate::adapter::ChatRequest;
use crate::http::error::ApiError;

// Field charsets, compiled once.
static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());
static WORKSPACE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.:_-]{1,128}$").unwrap());

pub const MAX_PROMPT_LEN: usize = 100_000;
pub const MAX_SYSTEM_PROMPT_LEN: usize = 10_000;
pub const MAX_TOOLS: usize = 100;
pub const MAX_MESSAGES: usize = 100;
/// Cap on the summed text content across all chat messages.
pub const MAX_TOTAL_CONTENT_LEN: usize = 100_000;

fn field_error(code: &str, field: &str, message: String) -> ApiError {
    ApiError::validation(code, message).with_details(json!({ "field": field }))
}

// ── Native endpoint ───────────────────────────────────────────────────────────

/// Validate a `POST /api/claude` body and build the normalized request.
pub fn validate_native(body: &Value) -> Result<NormalizedRequest, ApiError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ApiError::validation("invalid_json", "Request body must be a JSON object"))?;

    let prompt = match obj.get("prompt") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(field_error(
                "invalid_field",
                "prompt",
                "prompt must be a string".into(),
            ))
        }
        None => {
            return Err(field_error(
                "missing_field",
                "prompt",
                "prompt is required".into(),
            ))
        }
    };
    if prompt.is_empty() || prompt.len() > MAX_PROMPT_LEN {
        return Err(field_error(
            "invalid_field",
            "prompt",
            format!("prompt length must be 1..{MAX_PROMPT_LEN}"),
        ));
    }

    let session_id = optional_matching(obj, "session-id", &SESSION_ID_RE)?;
    let workspace = optional_matching(obj, "workspace", &WORKSPACE_NAME_RE)?;

    let system_prompt = match obj.get("system-prompt") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.len() <= MAX_SYSTEM_PROMPT_LEN => Some(s.clone()),
        Some(Value::String(_)) => {
            return Err(field_error(
                "invalid_field",
                "system-prompt",
                format!("system-prompt length must be at most {MAX_SYSTEM_PROMPT_LEN}"),
            ))
        }
        Some(_) => {
            return Err(field_error(
                "invalid_field",
                "system-prompt",
                "system-prompt must be a string".into(),
            ))
        }
    };

    let skip_permissions = match obj.get("dangerously-skip-permissions") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(field_error(
                "invalid_field",
                "dangerously-skip-permissions",
                "dangerously-skip-permissions must be a boolean".into(),
            ))
        }
    };

    let allowed_tools = tool_list(obj, "allowed-tools")?;
    let disallowed_tools = tool_list(obj, "disallowed-tools")?;
    let mcp_allowed_tools = tool_list(obj, "mcp-allowed-tools")?;

    check_tool_conflict(&allowed_tools, &disallowed_tools)?;

    Ok(NormalizedRequest {
        prompt,
        session_id,
        workspace,
        system_prompt,
        skip_permissions,
        allowed_tools,
        disallowed_tools,
        mcp_allowed_tools,
        files: Vec::new(),
    })
}

/// Reject requests where a tool is both allowed and disallowed.
pub fn check_tool_conflict(allowed: &[String], disallowed: &[String]) -> Result<(), ApiError> {
    let conflicts: Vec<&String> = allowed.iter().filter(|t| disallowed.contains(t)).collect();
    if conflicts.is_empty() {
        return Ok(());
    }
    Err(ApiError::validation(
        "conflicting_tool_permissions",
        "A tool may not appear in both allowed-tools and disallowed-tools",
    )
    .with_details(json!({
        "field": "allowed-tools/disallowed-tools",
        "value": conflicts,
    })))
}

fn optional_matching(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    charset: &Regex,
) -> Result<Option<String>, ApiError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            if charset.is_match(s) {
                Ok(Some(s.clone()))
            } else {
                Err(field_error(
                    "invalid_field",
                    field,
                    format!("{field} must match {}", charset.as_str()),
                ))
            }
        }
        Some(_) => Err(field_error(
            "invalid_field",
            field,
            format!("{field} must be a string"),
        )),
    }
}

fn tool_list(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Vec<String>, ApiError> {
    let items = match obj.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(field_error(
                "invalid_field",
                field,
                format!("{field} must be an array of tool names"),
            ))
        }
    };
    if items.len() > MAX_TOOLS {
        return Err(field_error(
            "invalid_field",
            field,
            format!("{field} may contain at most {MAX_TOOLS} entries"),
        ));
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.as_str() else {
            return Err(field_error(
                "invalid_field",
                field,
                format!("{field} entries must be strings"),
            ));
        };
        if !TOOL_NAME_RE.is_match(name) {
            return Err(field_error(
                "invalid_field",
                field,
                format!("invalid tool name {name:?} in {field}"),
            ));
        }
        out.push(name.to_string());
    }
    Ok(out)
}

// ── OpenAI endpoint ───────────────────────────────────────────────────────────

/// Validate a `POST /v1/chat/completions` body and deserialize it.
pub fn validate_openai(body: &Value) -> Result<ChatRequest, ApiError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ApiError::validation("invalid_json", "Request body must be a JSON object"))?;

    // Streaming is the only supported mode; reject early so no process is
    // ever spawned for a request we cannot answer.
    match obj.get("stream") {
        Some(Value::Bool(true)) => {}
        _ => {
            return Err(field_error(
                "streaming_required",
                "stream",
                "Only streaming is supported".into(),
            ))
        }
    }

    let messages = match obj.get("messages") {
        Some(Value::Array(m)) => m,
        Some(_) => {
            return Err(field_error(
                "invalid_field",
                "messages",
                "messages must be an array".into(),
            ))
        }
        None => {
            return Err(field_error(
                "missing_field",
                "messages",
                "messages is required".into(),
            ))
        }
    };
    if messages.is_empty() || messages.len() > MAX_MESSAGES {
        return Err(field_error(
            "invalid_field",
            "messages",
            format!("messages must contain 1..{MAX_MESSAGES} items"),
        ));
    }

    let mut total_len = 0usize;
    for (i, message) in messages.iter().enumerate() {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        if !matches!(role, "system" | "user" | "assistant") {
            return Err(field_error(
                "invalid_field",
                "messages",
                format!("messages[{i}].role must be system, user, or assistant"),
            ));
        }
        match message.get("content") {
            Some(Value::String(s)) => {
                if s.is_empty() || s.len() > MAX_PROMPT_LEN {
                    return Err(field_error(
                        "invalid_field",
                        "messages",
                        format!("messages[{i}].content length must be 1..{MAX_PROMPT_LEN}"),
                    ));
                }
                total_len += s.len();
            }
            Some(Value::Array(parts)) => {
                for part in parts {
                    if !part.is_object() {
                        return Err(field_error(
                            "invalid_field",
                            "messages",
                            format!("messages[{i}].content parts must be objects"),
                        ));
                    }
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        total_len += text.len();
                    }
                }
            }
            _ => {
                return Err(field_error(
                    "invalid_field",
                    "messages",
                    format!("messages[{i}].content must be a string or a part list"),
                ))
            }
        }
    }
    if total_len > MAX_TOTAL_CONTENT_LEN {
        return Err(field_error(
            "invalid_field",
            "messages",
            format!("total message content exceeds {MAX_TOTAL_CONTENT_LEN} characters"),
        ));
    }

    if let Some(t) = obj.get("temperature") {
        let ok = t.as_f64().map(|v| (0.0..=2.0).contains(&v)).unwrap_or(false);
        if !ok {
            return Err(field_error(
                "invalid_field",
                "temperature",
                "temperature must be a number in [0, 2]".into(),
            ));
        }
    }
    if let Some(m) = obj.get("max_tokens") {
        let ok = m
            .as_u64()
            .map(|v| (1..=1_000_000).contains(&v))
            .unwrap_or(false);
        if !ok {
            return Err(field_error(
                "invalid_field",
                "max_tokens",
                "max_tokens must be an integer in [1, 1000000]".into(),
            ));
        }
    }

    serde_json::from_value(body.clone())
        .map_err(|e| ApiError::validation("invalid_json", format!("malformed request: {e}")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Native ────────────────────────────────────────────────────────────────

    #[test]
    fn minimal_native_request_is_accepted() {
        let req = validate_native(&json!({"prompt": "Hi"})).unwrap();
        assert_eq!(req.prompt, "Hi");
        assert!(req.session_id.is_none());
        assert!(!req.skip_permissions);
        assert!(req.allowed_tools.is_empty());
    }

    #[test]
    fn full_native_request_round_trips() {
        let req = validate_native(&json!({
            "prompt": "do it",
            "session-id": "abc-123_XYZ",
            "workspace": "proj",
            "system-prompt": "be terse",
            "dangerously-skip-permissions": true,
            "allowed-tools": ["Bash", "mcp__gh__pr"],
            "disallowed-tools": ["Write"],
            "mcp-allowed-tools": ["mcp__gh__issue"],
        }))
        .unwrap();
        assert_eq!(req.session_id.as_deref(), Some("abc-123_XYZ"));
        assert_eq!(req.workspace.as_deref(), Some("proj"));
        assert_eq!(req.system_prompt.as_deref(), Some("be terse"));
        assert!(req.skip_permissions);
        assert_eq!(req.allowed_tools.len(), 2);
    }

    #[test]
    fn missing_prompt_is_rejected() {
        let err = validate_native(&json!({})).unwrap_err();
        assert_eq!(err.code, "missing_field");
        assert_eq!(err.details.unwrap()["field"], "prompt");
    }

    #[test]
    fn empty_and_oversized_prompts_are_rejected() {
        assert!(validate_native(&json!({"prompt": ""})).is_err());
        let big = "x".repeat(MAX_PROMPT_LEN + 1);
        assert!(validate_native(&json!({ "prompt": big })).is_err());
    }

    #[test]
    fn bad_workspace_charset_is_rejected() {
        let err =
            validate_native(&json!({"prompt": "hi", "workspace": "../escape"})).unwrap_err();
        assert_eq!(err.code, "invalid_field");
        assert_eq!(err.details.unwrap()["field"], "workspace");
    }

    #[test]
    fn bad_tool_name_is_rejected() {
        let err = validate_native(&json!({
            "prompt": "hi",
            "allowed-tools": ["ok-tool", "bad tool with spaces"],
        }))
        .unwrap_err();
        assert_eq!(err.code, "invalid_field");
    }

    #[test]
    fn tool_conflict_is_rejected_with_offending_values() {
        let err = validate_native(&json!({
            "prompt": "hi",
            "allowed-tools": ["A", "B"],
            "disallowed-tools": ["B"],
        }))
        .unwrap_err();
        assert_eq!(err.code, "conflicting_tool_permissions");
        let details = err.details.unwrap();
        assert_eq!(details["field"], "allowed-tools/disallowed-tools");
        assert_eq!(details["value"], json!(["B"]));
    }

    #[test]
    fn too_many_tools_rejected() {
        let tools: Vec<String> = (0..=MAX_TOOLS).map(|i| format!("t{i}")).collect();
        let err =
            validate_native(&json!({"prompt": "hi", "allowed-tools": tools})).unwrap_err();
        assert_eq!(err.code, "invalid_field");
    }

    // ── OpenAI ────────────────────────────────────────────────────────────────

    fn minimal_openai(stream: Value) -> Value {
        json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": stream,
        })
    }

    #[test]
    fn minimal_openai_request_is_accepted() {
        let req = validate_openai(&minimal_openai(json!(true))).unwrap();
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn non_streaming_is_rejected() {
        let err = validate_openai(&minimal_openai(json!(false))).unwrap_err();
        assert_eq!(err.message, "Only streaming is supported");
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn absent_stream_flag_is_rejected() {
        let err =
            validate_openai(&json!({"messages": [{"role": "user", "content": "Hi"}]}))
                .unwrap_err();
        assert_eq!(err.message, "Only streaming is supported");
    }

    #[test]
    fn empty_messages_rejected() {
        let err = validate_openai(&json!({"messages": [], "stream": true})).unwrap_err();
        assert_eq!(err.code, "invalid_field");
    }

    #[test]
    fn unknown_role_rejected() {
        let err = validate_openai(&json!({
            "messages": [{"role": "tool", "content": "x"}],
            "stream": true,
        }))
        .unwrap_err();
        assert!(err.message.contains("role"));
    }

    #[test]
    fn structured_content_parts_are_accepted() {
        let req = validate_openai(&json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look at this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
            ]}],
            "stream": true,
        }))
        .unwrap();
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn total_content_cap_is_enforced() {
        let half = "x".repeat(60_000);
        let err = validate_openai(&json!({
            "messages": [
                {"role": "user", "content": half.clone()},
                {"role": "assistant", "content": half},
            ],
            "stream": true,
        }))
        .unwrap_err();
        assert!(err.message.contains("total message content"));
    }

    #[test]
    fn temperature_and_max_tokens_bounds() {
        let mut body = minimal_openai(json!(true));
        body["temperature"] = json!(2.5);
        assert!(validate_openai(&body).is_err());
        body["temperature"] = json!(1.0);
        body["max_tokens"] = json!(0);
        assert!(validate_openai(&body).is_err());
        body["max_tokens"] = json!(512);
        assert!(validate_openai(&body).is_ok());
    }
}
