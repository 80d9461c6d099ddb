// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Chat-completion → native request adaptation.
//!
//! OpenAI-style clients are stateless: they resend the whole conversation
//! every turn and have no field for "resume the agent session".  Session
//! continuity therefore rides inside the transcript itself — earlier
//! responses embedded a session-config block (see
//! [`brygga_core::SessionConfig`]), and this adapter recovers it:
//!
//! 1. a leading `system` message becomes the child's system prompt;
//! 2. history is scanned backwards for the most recent assistant message
//!    carrying a `session-id=` fragment, whose fragments become the base
//!    config;
//! 3. fragments in the final (current) message override the base;
//! 4. the prompt is the final message minus all fragments, unless an
//!    explicit `prompt="…"` override is present;
//! 5. file parts of the final message are collected for persistence.

use serde::Deserialize;

use brygga_core::{NormalizedRequest, SessionConfig};

use crate::files::Attachment;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Either the simple string form or the structured part list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
    #[serde(default)]
    pub file: Option<FilePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilePart {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl ChatMessage {
    /// Textual content: the string itself, or all text parts joined.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn attachments(&self) -> Vec<Attachment> {
        let MessageContent::Parts(parts) = &self.content else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for part in parts {
            match part.kind.as_str() {
                "image_url" => {
                    if let Some(img) = &part.image_url {
                        out.push(Attachment::Url(img.url.clone()));
                    }
                }
                "file" => {
                    if let Some(file) = &part.file {
                        if let Some(data) = &file.file_data {
                            out.push(Attachment::Data {
                                data: data.clone(),
                                filename: file.filename.clone(),
                            });
                        } else if let Some(id) = &file.file_id {
                            out.push(Attachment::Reference(id.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

/// Adapter output: the spawnable request plus the session config the
/// translator echoes back.
#[derive(Debug)]
pub struct AdaptedRequest {
    pub request: NormalizedRequest,
    pub session: SessionConfig,
    pub attachments: Vec<Attachment>,
}

/// Convert a validated chat-completion request into a native request.
pub fn adapt(chat: &ChatRequest, show_thinking: bool) -> AdaptedRequest {
    // Leading system message → system prompt; it takes no part in the
    // session scan.
    let (system_prompt, start) = match chat.messages.first() {
        Some(first) if first.role == "system" => (Some(first.text()), 1),
        _ => (None, 0),
    };

    // Validation guarantees at least one message; degrade to an empty
    // request rather than panicking if called off the validated path.
    let Some(last) = chat.messages.last() else {
        let mut session = SessionConfig::default();
        session.show_thinking = show_thinking;
        return AdaptedRequest {
            request: NormalizedRequest::default(),
            session,
            attachments: Vec::new(),
        };
    };
    let last_text = last.text();

    // Reverse scan over history (excluding the current message): the first
    // assistant message carrying a session marker wins, and the scan stops
    // there — older sessions in the same transcript are superseded.
    let mut previous = SessionConfig::default();
    let history_end = chat.messages.len().saturating_sub(1);
    for message in chat.messages[start..history_end].iter().rev() {
        if message.role != "assistant" {
            continue;
        }
        let text = message.text();
        if SessionConfig::has_session_marker(&text) {
            previous = SessionConfig::parse(&text);
            break;
        }
    }

    let current = SessionConfig::parse(&last_text);
    let mut session = previous.merge(current);
    session.show_thinking = show_thinking;

    let prompt = SessionConfig::extract_prompt(&last_text);
    let mut request = NormalizedRequest::from_session(prompt, &session);
    request.system_prompt = system_prompt;

    AdaptedRequest {
        request,
        session,
        attachments: last.attachments(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.into(),
            content: MessageContent::Text(content.into()),
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: None,
            messages,
            stream: Some(true),
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn plain_user_message_becomes_the_prompt() {
        let adapted = adapt(&request(vec![msg("user", "Hi")]), true);
        assert_eq!(adapted.request.prompt, "Hi");
        assert!(adapted.request.session_id.is_none());
        assert!(adapted.request.system_prompt.is_none());
    }

    #[test]
    fn leading_system_message_becomes_system_prompt() {
        let adapted = adapt(
            &request(vec![msg("system", "be terse"), msg("user", "Hi")]),
            true,
        );
        assert_eq!(adapted.request.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(adapted.request.prompt, "Hi");
    }

    #[test]
    fn session_is_reconstructed_from_assistant_history() {
        let adapted = adapt(
            &request(vec![
                msg("user", "start a session"),
                msg("assistant", "session-id=xyz\nworkspace=proj\ndone."),
                msg("user", "continue please"),
            ]),
            true,
        );
        assert_eq!(adapted.request.session_id.as_deref(), Some("xyz"));
        assert_eq!(adapted.request.workspace.as_deref(), Some("proj"));
        assert_eq!(adapted.request.prompt, "continue please");
        assert_eq!(adapted.session.session_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn reverse_scan_stops_at_most_recent_marker() {
        let adapted = adapt(
            &request(vec![
                msg("assistant", "session-id=old\nworkspace=old-ws"),
                msg("assistant", "session-id=new"),
                msg("user", "go"),
            ]),
            true,
        );
        // The newer marker wins, and the scan stops before the older one —
        // its workspace must NOT leak through.
        assert_eq!(adapted.request.session_id.as_deref(), Some("new"));
        assert!(adapted.request.workspace.is_none());
    }

    #[test]
    fn assistant_without_marker_is_skipped() {
        let adapted = adapt(
            &request(vec![
                msg("assistant", "session-id=abc"),
                msg("assistant", "just prose, no marker"),
                msg("user", "go"),
            ]),
            true,
        );
        assert_eq!(adapted.request.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn current_message_overrides_history() {
        let adapted = adapt(
            &request(vec![
                msg("assistant", "session-id=xyz\nworkspace=old"),
                msg("user", "workspace=new fix the tests"),
            ]),
            true,
        );
        assert_eq!(adapted.request.session_id.as_deref(), Some("xyz"));
        assert_eq!(adapted.request.workspace.as_deref(), Some("new"));
        assert_eq!(adapted.request.prompt, "fix the tests");
    }

    #[test]
    fn explicit_prompt_fragment_wins() {
        let adapted = adapt(
            &request(vec![msg("user", "workspace=proj prompt=\"run tests\" ignored tail")]),
            true,
        );
        assert_eq!(adapted.request.prompt, "run tests");
    }

    #[test]
    fn fragment_only_message_falls_back_to_raw_text() {
        let adapted = adapt(&request(vec![msg("user", "session-id=abc")]), true);
        assert_eq!(adapted.request.prompt, "session-id=abc");
    }

    #[test]
    fn show_thinking_flag_is_applied_to_session() {
        let adapted = adapt(&request(vec![msg("user", "Hi")]), false);
        assert!(!adapted.session.show_thinking);
    }

    #[test]
    fn text_parts_are_concatenated() {
        let message = ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart {
                    kind: "text".into(),
                    text: Some("first".into()),
                    image_url: None,
                    file: None,
                },
                ContentPart {
                    kind: "text".into(),
                    text: Some("second".into()),
                    image_url: None,
                    file: None,
                },
            ]),
        };
        assert_eq!(message.text(), "first\nsecond");
    }

    #[test]
    fn attachments_are_collected_from_the_last_message() {
        let message = ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart {
                    kind: "text".into(),
                    text: Some("look".into()),
                    image_url: None,
                    file: None,
                },
                ContentPart {
                    kind: "image_url".into(),
                    text: None,
                    image_url: Some(ImageUrl {
                        url: "data:image/png;base64,AAAA".into(),
                    }),
                    file: None,
                },
                ContentPart {
                    kind: "file".into(),
                    text: None,
                    image_url: None,
                    file: Some(FilePart {
                        file_id: None,
                        file_data: Some("QUJD".into()),
                        filename: Some("notes.txt".into()),
                    }),
                },
            ]),
        };
        let adapted = adapt(&request(vec![message]), true);
        assert_eq!(adapted.attachments.len(), 2);
        assert!(matches!(adapted.attachments[0], Attachment::Url(_)));
        assert!(matches!(adapted.attachments[1], Attachment::Data { .. }));
        assert_eq!(adapted.request.prompt, "look");
    }
}
