// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub child: ChildConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body size in bytes.  Requests above this
    /// limit are rejected with 413 before any JSON parsing happens.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_body_limit() -> usize {
    32 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted bearer tokens.  An empty list disables authentication
    /// entirely — every request is admitted without an Authorization header.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Program spawned per request.  Resolved via PATH unless absolute.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Wall-clock ceiling for one child run, in milliseconds.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Maximum silence on the child's stdout before the run is terminated,
    /// in milliseconds.  Reset on every stdout read, before parsing, so a
    /// slow downstream consumer can never trigger a spurious kill.
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    /// Grace between the graceful and the forceful termination signal,
    /// in milliseconds.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_binary() -> String {
    "claude".into()
}
fn default_total_timeout_ms() -> u64 {
    3_600_000
}
fn default_inactivity_timeout_ms() -> u64 {
    300_000
}
fn default_kill_grace_ms() -> u64 {
    5_000
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            total_timeout_ms: default_total_timeout_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory under which per-request workspaces are created.
    /// Defaults to the process working directory when unset.
    #[serde(default)]
    pub base_path: Option<PathBuf>,
}

impl WorkspaceConfig {
    /// Effective base path: configured value or the process working
    /// directory.
    pub fn effective_base(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Path of the MCP server registry JSON.  Defaults to
    /// `<workspace base>/mcp-config.json` when unset.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

impl McpConfig {
    pub fn effective_path(&self, workspace_base: &std::path::Path) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| workspace_base.join("mcp-config.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// When true, reasoning and tool activity are wrapped in
    /// `<thinking>…</thinking>` markers; when false they are emitted inside
    /// fenced code blocks with icon prefixes.  Content is never suppressed.
    #[serde(default = "default_true")]
    pub show_thinking: bool,
    /// Content chunk size in characters for chat-completion deltas.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
}

fn default_chunk_chars() -> usize {
    100
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            show_thinking: true,
            chunk_chars: default_chunk_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log filter when neither RUST_LOG nor LOG_LEVEL is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "development" or "production".  Production uses a compact no-ANSI
    /// log format and omits error details from HTTP envelopes.
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_log_level() -> String {
    "debug".into()
}
fn default_environment() -> String {
    "development".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            environment: default_environment(),
        }
    }
}

impl LogConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
