// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Session-config mini-language.
//!
//! Chat-completion clients have no field for "resume this agent session",
//! so brygga embeds the session state as plain `key=value` fragments in
//! assistant message text:
//!
//! ```text
//! session-id=7f3a2c…
//! workspace=proj
//! dangerously-skip-permissions=false
//! allowed-tools=["Bash","Read"]
//! ```
//!
//! On the next turn the client sends the whole conversation back, and the
//! request adapter re-parses these fragments from history to reconstruct
//! continuity.  Fragments may also appear in the *current* user message as
//! overrides, including `prompt="…"` to separate the actual prompt from the
//! directives.
//!
//! Fragments are recognized at line starts or after whitespace, so
//! `disallowed-tools=` can never be misread as `allowed-tools=`.  When a key
//! occurs more than once in one text, the last occurrence wins.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// Fragment patterns, compiled once.  All are anchored to a line start or a
// preceding whitespace char so `disallowed-tools=` can never be misread as
// `allowed-tools=`.
static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)session-id=([A-Za-z0-9_-]+)").unwrap());
static WORKSPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)workspace=([A-Za-z0-9_-]+)").unwrap());
static SKIP_PERMISSIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)dangerously-skip-permissions=(true|false)").unwrap());
static ALLOWED_TOOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)allowed-tools=\[([^\]]*)\]").unwrap());
static DISALLOWED_TOOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)disallowed-tools=\[([^\]]*)\]").unwrap());
static MCP_ALLOWED_TOOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)mcp-allowed-tools=\[([^\]]*)\]").unwrap());
static PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|\s)prompt="([^"]*)""#).unwrap());

/// One pattern matching any fragment, for stripping.
static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:^|\s)(?:",
        r"session-id=[A-Za-z0-9_-]+",
        r"|workspace=[A-Za-z0-9_-]+",
        r"|dangerously-skip-permissions=(?:true|false)",
        r"|(?:mcp-allowed|allowed|disallowed)-tools=\[[^\]]*\]",
        r#"|prompt="[^"]*""#,
        r")"
    ))
    .unwrap()
});

/// Session continuity and tool policy reconstructed from message text.
///
/// Every field except `show_thinking` is tri-state: absent (None) means
/// "not mentioned", which matters for the rightward merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: Option<String>,
    pub workspace: Option<String>,
    pub skip_permissions: Option<bool>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
    pub mcp_allowed_tools: Option<Vec<String>>,
    /// Explicit prompt override (`prompt="…"`); only meaningful in the
    /// current message, never echoed back in session-info blocks.
    pub prompt: Option<String>,
    /// Presentation flag, set from gateway config — not part of the
    /// mini-language.
    pub show_thinking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            workspace: None,
            skip_permissions: None,
            allowed_tools: None,
            disallowed_tools: None,
            mcp_allowed_tools: None,
            prompt: None,
            show_thinking: true,
        }
    }
}

impl SessionConfig {
    /// Parse every mini-language fragment in `text`.  For repeated keys the
    /// last occurrence wins.
    pub fn parse(text: &str) -> Self {
        let mut cfg = Self::default();
        cfg.session_id = last_capture(text, &SESSION_ID_RE);
        cfg.workspace = last_capture(text, &WORKSPACE_RE);
        cfg.skip_permissions = last_capture(text, &SKIP_PERMISSIONS_RE).map(|v| v == "true");
        cfg.allowed_tools = last_capture(text, &ALLOWED_TOOLS_RE).map(|s| parse_items(&s));
        cfg.disallowed_tools = last_capture(text, &DISALLOWED_TOOLS_RE).map(|s| parse_items(&s));
        cfg.mcp_allowed_tools =
            last_capture(text, &MCP_ALLOWED_TOOLS_RE).map(|s| parse_items(&s));
        cfg.prompt = last_capture(text, &PROMPT_RE);
        cfg
    }

    /// Rightward merge: every field *present* in `overrides` replaces the
    /// corresponding field of `self`.
    pub fn merge(mut self, overrides: Self) -> Self {
        if overrides.session_id.is_some() {
            self.session_id = overrides.session_id;
        }
        if overrides.workspace.is_some() {
            self.workspace = overrides.workspace;
        }
        if overrides.skip_permissions.is_some() {
            self.skip_permissions = overrides.skip_permissions;
        }
        if overrides.allowed_tools.is_some() {
            self.allowed_tools = overrides.allowed_tools;
        }
        if overrides.disallowed_tools.is_some() {
            self.disallowed_tools = overrides.disallowed_tools;
        }
        if overrides.mcp_allowed_tools.is_some() {
            self.mcp_allowed_tools = overrides.mcp_allowed_tools;
        }
        if overrides.prompt.is_some() {
            self.prompt = overrides.prompt;
        }
        self.show_thinking = overrides.show_thinking;
        self
    }

    /// Format the session-info block: one line per set field, fixed order,
    /// each line `\n`-terminated.  The `prompt` field is never echoed.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.session_id {
            out.push_str(&format!("session-id={id}\n"));
        }
        if let Some(ws) = &self.workspace {
            out.push_str(&format!("workspace={ws}\n"));
        }
        if let Some(skip) = self.skip_permissions {
            out.push_str(&format!("dangerously-skip-permissions={skip}\n"));
        }
        if let Some(tools) = &self.allowed_tools {
            out.push_str(&format!("allowed-tools={}\n", format_items(tools)));
        }
        if let Some(tools) = &self.disallowed_tools {
            out.push_str(&format!("disallowed-tools={}\n", format_items(tools)));
        }
        if let Some(tools) = &self.mcp_allowed_tools {
            out.push_str(&format!("mcp-allowed-tools={}\n", format_items(tools)));
        }
        out
    }

    /// True when `text` carries a `session-id=` fragment — the marker the
    /// reverse history scan stops at.
    pub fn has_session_marker(text: &str) -> bool {
        SESSION_ID_RE.is_match(text)
    }

    /// Remove every mini-language fragment from `text` and collapse the
    /// remaining whitespace.  What is left over is the implicit prompt.
    pub fn strip_fragments(text: &str) -> String {
        let stripped = FRAGMENT_RE.replace_all(text, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Extract the prompt from a user message: an explicit `prompt="…"`
    /// fragment wins; otherwise the text minus all fragments; when that is
    /// empty, the original text verbatim.
    pub fn extract_prompt(text: &str) -> String {
        if let Some(p) = last_capture(text, &PROMPT_RE) {
            return p;
        }
        let remainder = Self::strip_fragments(text);
        if remainder.is_empty() {
            text.to_string()
        } else {
            remainder
        }
    }
}

fn last_capture(text: &str, re: &Regex) -> Option<String> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse the inside of a `[...]` tool list.  Single and double quotes are
/// both accepted; unquoted bare words are tolerated for resilience.
fn parse_items(inner: &str) -> Vec<String> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| {
            item.trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn format_items(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|t| format!("\"{t}\"")).collect();
    format!("[{}]", quoted.join(","))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_fragment_set() {
        let text = "session-id=abc-123\nworkspace=proj\ndangerously-skip-permissions=true\n\
                    allowed-tools=[\"Bash\",\"Read\"]\ndisallowed-tools=['Write']\n\
                    mcp-allowed-tools=[]\nprompt=\"do the thing\"";
        let cfg = SessionConfig::parse(text);
        assert_eq!(cfg.session_id.as_deref(), Some("abc-123"));
        assert_eq!(cfg.workspace.as_deref(), Some("proj"));
        assert_eq!(cfg.skip_permissions, Some(true));
        assert_eq!(cfg.allowed_tools, Some(vec!["Bash".into(), "Read".into()]));
        assert_eq!(cfg.disallowed_tools, Some(vec!["Write".into()]));
        assert_eq!(cfg.mcp_allowed_tools, Some(Vec::new()));
        assert_eq!(cfg.prompt.as_deref(), Some("do the thing"));
    }

    #[test]
    fn parse_requires_line_anchor_or_whitespace() {
        // "xsession-id=..." must not match; "disallowed-tools" must not feed
        // "allowed-tools".
        let cfg = SessionConfig::parse("xsession-id=abc");
        assert_eq!(cfg.session_id, None);

        let cfg = SessionConfig::parse("disallowed-tools=[\"Write\"]");
        assert_eq!(cfg.allowed_tools, None);
        assert_eq!(cfg.disallowed_tools, Some(vec!["Write".into()]));
    }

    #[test]
    fn mcp_list_does_not_feed_allowed_list() {
        let cfg = SessionConfig::parse("mcp-allowed-tools=[\"mcp__gh__x\"]");
        assert_eq!(cfg.allowed_tools, None);
        assert_eq!(cfg.mcp_allowed_tools, Some(vec!["mcp__gh__x".into()]));
    }

    #[test]
    fn repeated_key_last_occurrence_wins() {
        let cfg = SessionConfig::parse("workspace=first\nworkspace=second");
        assert_eq!(cfg.workspace.as_deref(), Some("second"));
    }

    #[test]
    fn empty_list_parses_to_empty_vec() {
        let cfg = SessionConfig::parse("allowed-tools=[]");
        assert_eq!(cfg.allowed_tools, Some(Vec::new()));
    }

    #[test]
    fn merge_is_rightward() {
        let previous = SessionConfig {
            session_id: Some("old".into()),
            workspace: Some("proj".into()),
            skip_permissions: Some(false),
            ..Default::default()
        };
        let current = SessionConfig {
            session_id: Some("new".into()),
            ..Default::default()
        };
        let merged = previous.merge(current);
        assert_eq!(merged.session_id.as_deref(), Some("new"));
        assert_eq!(merged.workspace.as_deref(), Some("proj"));
        assert_eq!(merged.skip_permissions, Some(false));
    }

    #[test]
    fn format_orders_fields_and_terminates_lines() {
        let cfg = SessionConfig {
            session_id: Some("abc".into()),
            workspace: Some("proj".into()),
            skip_permissions: Some(false),
            allowed_tools: Some(vec!["Bash".into(), "Read".into()]),
            disallowed_tools: Some(vec![]),
            mcp_allowed_tools: Some(vec!["mcp__gh__pr".into()]),
            ..Default::default()
        };
        assert_eq!(
            cfg.format(),
            "session-id=abc\nworkspace=proj\ndangerously-skip-permissions=false\n\
             allowed-tools=[\"Bash\",\"Read\"]\ndisallowed-tools=[]\n\
             mcp-allowed-tools=[\"mcp__gh__pr\"]\n"
        );
    }

    #[test]
    fn format_skips_unset_fields() {
        let cfg = SessionConfig {
            session_id: Some("abc".into()),
            ..Default::default()
        };
        assert_eq!(cfg.format(), "session-id=abc\n");
        assert_eq!(SessionConfig::default().format(), "");
    }

    #[test]
    fn round_trip_parse_then_format_is_canonical() {
        // Property: formatting a parse of well-formed fragments yields the
        // normalized block, independent of input ordering and quote style.
        let text = "workspace=proj  session-id=abc\nallowed-tools=['a', \"b\"]";
        let formatted = SessionConfig::parse(text).format();
        assert_eq!(
            formatted,
            "session-id=abc\nworkspace=proj\nallowed-tools=[\"a\",\"b\"]\n"
        );
        // A second round trip is a fixed point.
        assert_eq!(SessionConfig::parse(&formatted).format(), formatted);
    }

    #[test]
    fn strip_fragments_collapses_whitespace() {
        let text = "fix the bug session-id=abc\nworkspace=proj   please";
        assert_eq!(SessionConfig::strip_fragments(text), "fix the bug please");
    }

    #[test]
    fn extract_prompt_prefers_explicit_fragment() {
        let text = "session-id=abc prompt=\"run the tests\" trailing words";
        assert_eq!(SessionConfig::extract_prompt(text), "run the tests");
    }

    #[test]
    fn extract_prompt_falls_back_to_stripped_remainder() {
        let text = "session-id=abc  fix the login bug";
        assert_eq!(SessionConfig::extract_prompt(text), "fix the login bug");
    }

    #[test]
    fn extract_prompt_falls_back_to_original_when_only_fragments() {
        let text = "session-id=abc";
        assert_eq!(SessionConfig::extract_prompt(text), "session-id=abc");
    }

    #[test]
    fn session_marker_detection() {
        assert!(SessionConfig::has_session_marker("session-id=abc rest"));
        assert!(SessionConfig::has_session_marker("text\nsession-id=abc"));
        assert!(!SessionConfig::has_session_marker("no marker here"));
        assert!(!SessionConfig::has_session_marker("xsession-id=abc"));
    }
}
