// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use crate::SessionConfig;

/// A fully validated request, normalized across both HTTP endpoints.
///
/// Constructed once at admission and read-only afterwards; the supervisor
/// and command builder only borrow it.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRequest {
    /// The user prompt.  Written to the child's stdin, never to argv.
    pub prompt: String,
    /// Opaque resume token of a previous child session.
    pub session_id: Option<String>,
    /// Workspace name; None selects the shared workspace.
    pub workspace: Option<String>,
    /// Optional system-prompt override forwarded to the child.
    pub system_prompt: Option<String>,
    pub skip_permissions: bool,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub mcp_allowed_tools: Vec<String>,
    /// Absolute paths of uploaded attachments already written into the
    /// workspace.
    pub files: Vec<PathBuf>,
}

impl NormalizedRequest {
    /// Build a normalized request from an adapter-produced session config
    /// plus the extracted prompt.
    pub fn from_session(prompt: String, session: &SessionConfig) -> Self {
        Self {
            prompt,
            session_id: session.session_id.clone(),
            workspace: session.workspace.clone(),
            system_prompt: None,
            skip_permissions: session.skip_permissions.unwrap_or(false),
            allowed_tools: session.allowed_tools.clone().unwrap_or_default(),
            disallowed_tools: session.disallowed_tools.clone().unwrap_or_default(),
            mcp_allowed_tools: session.mcp_allowed_tools.clone().unwrap_or_default(),
            files: Vec::new(),
        }
    }

    /// The payload written to the child's stdin: the prompt, plus an
    /// attachment trailer when uploads are present.
    pub fn stdin_payload(&self) -> String {
        if self.files.is_empty() {
            return self.prompt.clone();
        }
        let mut out = self.prompt.clone();
        out.push_str("\n\nAttached files:\n");
        for path in &self.files {
            out.push_str(&format!("- {}\n", path.display()));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_session_copies_policy_fields() {
        let session = SessionConfig {
            session_id: Some("abc".into()),
            workspace: Some("proj".into()),
            skip_permissions: Some(true),
            allowed_tools: Some(vec!["Bash".into()]),
            ..Default::default()
        };
        let req = NormalizedRequest::from_session("hi".into(), &session);
        assert_eq!(req.prompt, "hi");
        assert_eq!(req.session_id.as_deref(), Some("abc"));
        assert_eq!(req.workspace.as_deref(), Some("proj"));
        assert!(req.skip_permissions);
        assert_eq!(req.allowed_tools, vec!["Bash"]);
        assert!(req.disallowed_tools.is_empty());
    }

    #[test]
    fn stdin_payload_without_files_is_just_the_prompt() {
        let req = NormalizedRequest {
            prompt: "hello".into(),
            ..Default::default()
        };
        assert_eq!(req.stdin_payload(), "hello");
    }

    #[test]
    fn stdin_payload_appends_attachment_trailer() {
        let req = NormalizedRequest {
            prompt: "describe these".into(),
            files: vec![PathBuf::from("/ws/uploads/a.png")],
            ..Default::default()
        };
        let payload = req.stdin_payload();
        assert!(payload.starts_with("describe these"));
        assert!(payload.contains("Attached files:\n- /ws/uploads/a.png\n"));
    }
}
