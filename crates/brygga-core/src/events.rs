// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Typed view of the child agent's stream-json protocol.
//!
//! The child writes one JSON value per stdout line.  This module is the
//! single boundary where those untyped lines become [`ChildEvent`] values;
//! nothing downstream ever dispatches on raw `type` strings again.
//!
//! Lines that fail to parse as JSON are the child's problem, not ours —
//! they are logged and skipped, never fatal (the child protocol guarantees
//! one complete JSON value per line, but a crashing child can emit partial
//! garbage on its way down).

use serde_json::Value;
use tracing::debug;

/// One event parsed from a child stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    /// `{"type":"system","subtype":"init",...}` — carries the session id the
    /// child allocated (or resumed).
    SystemInit { session_id: String },
    /// `{"type":"assistant","message":{...}}` — a batch of content blocks
    /// plus the model's stop reason.
    AssistantContent {
        blocks: Vec<ContentBlock>,
        stop_reason: Option<String>,
    },
    /// `{"type":"user","message":{...}}` — a tool result echoed back into
    /// the transcript.
    UserToolResult { content: String, is_error: bool },
    /// `{"type":"result","subtype":"success"}` — terminal success envelope.
    ResultSuccess,
    /// `{"type":"error",...}` or `{"type":"result","subtype":"error*"}`.
    Error { message: String },
    /// Anything with an unrecognized `type`/`subtype` combination.  Kept
    /// with its raw payload so the client can still see it.
    Unknown { kind: String, raw: Value },
}

/// One content block inside an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    Thinking { text: String },
    ToolUse { name: String, input: Value },
}

/// A classified stdout line: the original text plus its typed event.
///
/// The raw line is kept because the native endpoint passes it through
/// verbatim — re-serializing the typed event would reorder object keys.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub raw: String,
    pub event: ChildEvent,
}

/// Parse and classify one stdout line.
///
/// Returns None for blank lines and for lines that are not valid JSON.
pub fn classify_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, line = %preview(trimmed), "skipping unparseable child line");
            return None;
        }
    };
    Some(ParsedLine {
        raw: trimmed.to_string(),
        event: classify(value),
    })
}

fn classify(value: Value) -> ChildEvent {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let subtype = value
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match (kind.as_str(), subtype.as_str()) {
        ("system", "init") => {
            let session_id = value
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ChildEvent::SystemInit { session_id }
        }
        ("assistant", _) => {
            let message = value.get("message").cloned().unwrap_or(Value::Null);
            let stop_reason = message
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(String::from);
            let blocks = message
                .get("content")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(content_block).collect())
                .unwrap_or_default();
            ChildEvent::AssistantContent {
                blocks,
                stop_reason,
            }
        }
        ("user", _) => {
            let content = value
                .get("message")
                .and_then(|m| m.get("content"))
                .map(flatten_tool_content)
                .unwrap_or_default();
            let is_error = value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .any(|b| b.get("is_error").and_then(Value::as_bool) == Some(true))
                })
                .unwrap_or(false);
            ChildEvent::UserToolResult { content, is_error }
        }
        ("result", "success") => ChildEvent::ResultSuccess,
        ("result", sub) if sub.starts_with("error") => ChildEvent::Error {
            message: value
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("child reported an error result")
                .to_string(),
        },
        ("error", _) => ChildEvent::Error {
            message: value
                .get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown child error")
                .to_string(),
        },
        _ => {
            let label = if subtype.is_empty() {
                kind.clone()
            } else {
                format!("{kind}/{subtype}")
            };
            ChildEvent::Unknown {
                kind: label,
                raw: value,
            }
        }
    }
}

fn content_block(value: &Value) -> Option<ContentBlock> {
    match value.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            text: value
                .get("thinking")
                .or_else(|| value.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input: value.get("input").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

/// Flatten a user-message content value (string, or an array of
/// `tool_result` blocks whose content is itself a string or block list)
/// into plain text.
fn flatten_tool_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(inner)) => inner
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn preview(s: &str) -> String {
    let p: String = s.chars().take(120).collect();
    if s.chars().count() > 120 {
        format!("{p}…")
    } else {
        p
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
