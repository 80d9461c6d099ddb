// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Child-event → chat-completion-chunk translation.
//!
//! The state machine behind the OpenAI-compatible endpoint.  Guarantees,
//! enforced here and tested below:
//!
//! - exactly one `role:"assistant"` delta per response, before any content;
//! - the session-info block is emitted at most once, on the first init
//!   event;
//! - every chunk carries `finish_reason:null` except exactly one trailing
//!   `"stop"` chunk, which precedes `[DONE]`;
//! - an open thinking envelope is always closed before the stop chunk;
//! - content is sliced into fixed-size chunks on character boundaries,
//!   never mid-code-point.
//!
//! Non-answer content (reasoning, tool calls, tool results, unknown events)
//! is wrapped in a "thinking envelope".  Two presentations exist:
//! `show_thinking` on wraps in literal `<thinking>…</thinking>` markers;
//! off wraps in a fenced code block with icon prefixes, with embedded
//! triple-backticks defused so they cannot close the fence early.

use serde::Serialize;
use serde_json::Value;

use brygga_core::{ChildEvent, ContentBlock, SessionConfig, TimeoutKind};

/// Model name reported in every chunk.
pub const MODEL_NAME: &str = "claude-code";

/// SSE terminator payload.
pub const DONE_PAYLOAD: &str = "[DONE]";

#[derive(Serialize)]
struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct Choice {
    index: u32,
    delta: Delta,
    logprobs: Option<()>,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct CompletionChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: &'static str,
    system_fingerprint: String,
    choices: Vec<Choice>,
}

/// Stream translator state for one response.
pub struct OpenAiTranslator {
    session: SessionConfig,
    chunk_chars: usize,
    in_thinking: bool,
    session_emitted: bool,
    role_emitted: bool,
    /// The stop chunk has been emitted.
    finished: bool,
    /// `[DONE]` has been emitted; no further events may be forwarded.
    complete: bool,
    message_id: String,
    fingerprint: String,
}

impl OpenAiTranslator {
    pub fn new(session: SessionConfig, chunk_chars: usize) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self {
            session,
            chunk_chars: chunk_chars.max(1),
            in_thinking: false,
            session_emitted: false,
            role_emitted: false,
            finished: false,
            complete: false,
            message_id: format!("chatcmpl-{millis}"),
            fingerprint: format!("fp_{}", base36(millis.unsigned_abs())),
        }
    }

    /// True once `[DONE]` has been emitted — the coordinator must stop
    /// forwarding events and terminate the supervisor.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Translate one child event into zero or more SSE payloads.
    pub fn on_event(&mut self, event: &ChildEvent) -> Vec<String> {
        if self.complete {
            return Vec::new();
        }
        let mut out = Vec::new();
        match event {
            ChildEvent::SystemInit { session_id } => self.on_init(&mut out, session_id),
            ChildEvent::AssistantContent {
                blocks,
                stop_reason,
            } => self.on_assistant(&mut out, blocks, stop_reason.as_deref()),
            ChildEvent::UserToolResult { content, is_error } => {
                self.on_tool_result(&mut out, content, *is_error)
            }
            ChildEvent::ResultSuccess => {
                // A success envelope with no prior output still yields a
                // well-formed response: role, stop, terminator.
                self.emit_role(&mut out);
                self.close_thinking(&mut out);
                self.emit_stop(&mut out);
                out.push(DONE_PAYLOAD.to_string());
                self.complete = true;
            }
            ChildEvent::Error { message } => {
                self.emit_role(&mut out);
                self.close_thinking(&mut out);
                let text = self.wrap_notice(&format!("Error: {message}"));
                self.emit_content(&mut out, &text, true);
            }
            ChildEvent::Unknown { kind, raw } => self.on_unknown(&mut out, kind, raw),
        }
        out
    }

    /// A supervisor deadline fired: explain, stop, and terminate.
    pub fn on_timeout(&mut self, kind: TimeoutKind, limit: std::time::Duration) -> Vec<String> {
        if self.complete {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.emit_role(&mut out);
        self.close_thinking(&mut out);
        let notice = self.wrap_notice(&format!(
            "{kind} exceeded ({} ms); the agent run was terminated.",
            limit.as_millis()
        ));
        self.emit_content(&mut out, &notice, true);
        out.push(DONE_PAYLOAD.to_string());
        self.complete = true;
        out
    }

    /// Surface a pre-stream failure (e.g. the child could not be spawned)
    /// as a well-formed single-message response.
    pub fn fail(&mut self, message: &str) -> Vec<String> {
        if self.complete {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.emit_role(&mut out);
        self.close_thinking(&mut out);
        let notice = self.wrap_notice(message);
        self.emit_content(&mut out, &notice, true);
        out.push(DONE_PAYLOAD.to_string());
        self.complete = true;
        out
    }

    /// The event channel closed without a success envelope.
    pub fn finish(&mut self) -> Vec<String> {
        if self.complete {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.close_thinking(&mut out);
        if !self.role_emitted {
            self.emit_role(&mut out);
            self.emit_content(&mut out, "No response from the agent.", true);
        } else if !self.finished {
            self.emit_stop(&mut out);
        }
        out.push(DONE_PAYLOAD.to_string());
        self.complete = true;
        out
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_init(&mut self, out: &mut Vec<String>, session_id: &str) {
        // Later init events (e.g. from a child restart) are ignored; the
        // client already has its session block.
        if self.session_emitted {
            return;
        }
        self.session_emitted = true;
        self.emit_role(out);

        // The resumed session id from history wins over the child's; a
        // fresh session takes the child's id.
        if self.session.session_id.is_none() && !session_id.is_empty() {
            self.session.session_id = Some(session_id.to_string());
        }

        let mut text = self.session.format();
        if self.session.show_thinking {
            text.push_str("<thinking>\n");
            self.in_thinking = true;
        }
        self.emit_content(out, &text, false);
    }

    fn on_assistant(
        &mut self,
        out: &mut Vec<String>,
        blocks: &[ContentBlock],
        stop_reason: Option<&str>,
    ) {
        self.emit_role(out);
        let is_final = stop_reason == Some("end_turn");
        let last_index = blocks.len().saturating_sub(1);
        let mut saw_text = false;

        for (i, block) in blocks.iter().enumerate() {
            match block {
                ContentBlock::Text { text } => {
                    saw_text = true;
                    self.close_thinking(out);
                    let stop_here = is_final && i == last_index;
                    self.emit_content(out, &format!("\n{text}"), stop_here);
                }
                ContentBlock::Thinking { text } => {
                    self.open_thinking(out);
                    let wrapped = if self.session.show_thinking {
                        format!("{text}\n")
                    } else {
                        format!("💭 {}\n", defuse_fences(text))
                    };
                    self.emit_content(out, &wrapped, false);
                }
                ContentBlock::ToolUse { name, input } => {
                    self.open_thinking(out);
                    let rendered = serde_json::to_string(input).unwrap_or_default();
                    let wrapped = if self.session.show_thinking {
                        format!("Using {name}: {rendered}\n")
                    } else {
                        format!("🔧 Using {name}: {}\n", defuse_fences(&rendered))
                    };
                    self.emit_content(out, &wrapped, false);
                }
            }
        }

        if is_final && !saw_text {
            self.close_thinking(out);
            self.emit_stop(out);
        }
    }

    fn on_tool_result(&mut self, out: &mut Vec<String>, content: &str, is_error: bool) {
        self.emit_role(out);
        self.open_thinking(out);
        let wrapped = if self.session.show_thinking {
            let prefix = if is_error { "Tool Error: " } else { "Tool Result: " };
            format!("{prefix}{content}\n")
        } else {
            let prefix = if is_error { "⚠️ Tool Error: " } else { "📋 Tool Result: " };
            format!("{prefix}{}\n", defuse_fences(content))
        };
        self.emit_content(out, &wrapped, false);
    }

    fn on_unknown(&mut self, out: &mut Vec<String>, kind: &str, raw: &Value) {
        self.emit_role(out);
        self.open_thinking(out);
        let rendered = raw.to_string();
        let wrapped = if self.session.show_thinking {
            format!("[{kind}] {rendered}\n")
        } else {
            format!("🔍 [{kind}] {}\n", defuse_fences(&rendered))
        };
        self.emit_content(out, &wrapped, false);
    }

    // ── Envelope + chunk plumbing ─────────────────────────────────────────────

    fn open_thinking(&mut self, out: &mut Vec<String>) {
        if self.in_thinking {
            return;
        }
        self.in_thinking = true;
        let opener = if self.session.show_thinking {
            "<thinking>\n"
        } else {
            "\n```\n"
        };
        self.emit_content(out, opener, false);
    }

    fn close_thinking(&mut self, out: &mut Vec<String>) {
        if !self.in_thinking {
            return;
        }
        self.in_thinking = false;
        let closer = if self.session.show_thinking {
            "\n</thinking>\n"
        } else {
            "\n```\n"
        };
        self.emit_content(out, closer, false);
    }

    /// Notices (errors, timeouts) share the thinking presentation so they
    /// stand apart from real answer text.
    fn wrap_notice(&self, message: &str) -> String {
        if self.session.show_thinking {
            format!("\n{message}")
        } else {
            format!("\n```\n⚠️ {}\n```\n", defuse_fences(message))
        }
    }

    fn emit_role(&mut self, out: &mut Vec<String>) {
        if self.role_emitted {
            return;
        }
        self.role_emitted = true;
        out.push(self.chunk(
            Delta {
                role: Some("assistant"),
                content: None,
            },
            None,
        ));
    }

    /// Slice `text` into chunk-sized deltas.  When `stop_after` is set, the
    /// last slice carries `finish_reason:"stop"`.
    fn emit_content(&mut self, out: &mut Vec<String>, text: &str, stop_after: bool) {
        if text.is_empty() {
            if stop_after {
                self.emit_stop(out);
            }
            return;
        }
        let chars: Vec<char> = text.chars().collect();
        let slices: Vec<String> = chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect();
        let last = slices.len() - 1;
        for (i, slice) in slices.into_iter().enumerate() {
            let finish = if stop_after && i == last && !self.finished {
                self.finished = true;
                Some("stop")
            } else {
                None
            };
            out.push(self.chunk(
                Delta {
                    role: None,
                    content: Some(slice),
                },
                finish,
            ));
        }
    }

    /// Emit the lone empty-delta stop chunk (idempotent).
    fn emit_stop(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        out.push(self.chunk(
            Delta {
                role: None,
                content: None,
            },
            Some("stop"),
        ));
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<&'static str>) -> String {
        let chunk = CompletionChunk {
            id: self.message_id.clone(),
            object: "chat.completion.chunk",
            created: chrono::Utc::now().timestamp(),
            model: MODEL_NAME,
            system_fingerprint: self.fingerprint.clone(),
            choices: vec![Choice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason,
            }],
        };
        serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Insert spaces between backticks so embedded fences cannot close the
/// outer fenced block.
fn defuse_fences(text: &str) -> String {
    text.replace("```", "` ` `")
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
