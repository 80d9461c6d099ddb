// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, warn};

/// Prefix that marks a tool name as MCP-routed: `mcp__<server>__<tool>`.
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Read-only map of configured MCP servers, keyed by server identifier.
///
/// The descriptor values are opaque to the gateway; they are forwarded to the
/// child untouched via the config file path, never inspected.
#[derive(Debug, Clone, Default)]
pub struct McpRegistry {
    servers: HashMap<String, Value>,
}

impl McpRegistry {
    /// Empty registry — used when no MCP config file exists.  Every
    /// MCP-prefixed tool name is rejected by validation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the registry from an MCP config JSON file.
    ///
    /// Two layouts are accepted: the conventional `{"mcpServers": {...}}`
    /// wrapper, or a bare object of `server → descriptor` entries.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading MCP config {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing MCP config {}", path.display()))?;

        let map = match value {
            Value::Object(mut obj) => match obj.remove("mcpServers") {
                Some(Value::Object(servers)) => servers,
                Some(other) => {
                    anyhow::bail!(
                        "mcpServers in {} must be an object, got {}",
                        path.display(),
                        type_name(&other)
                    );
                }
                None => obj,
            },
            other => {
                anyhow::bail!(
                    "MCP config {} must be a JSON object, got {}",
                    path.display(),
                    type_name(&other)
                );
            }
        };

        let servers: HashMap<String, Value> = map.into_iter().collect();
        debug!(
            path = %path.display(),
            servers = servers.len(),
            "loaded MCP server registry"
        );
        Ok(Self { servers })
    }

    /// Load the registry, falling back to an empty one when the file does
    /// not exist.  A missing file is normal (MCP is optional); a malformed
    /// file is still an error.
    pub fn load_or_empty(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "MCP config not found — MCP tools disabled");
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    pub fn contains(&self, server: &str) -> bool {
        self.servers.contains_key(server)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.servers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Filter `requested` down to the names whose `mcp__<server>__` prefix
    /// refers to a configured server.
    ///
    /// Input order is preserved; duplicates are preserved.  Names without
    /// the MCP prefix, or with a malformed prefix, are dropped.
    pub fn validate_tools<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|name| match parse_tool_name(name) {
                Some((server, _tool)) => {
                    let known = self.contains(server);
                    if !known {
                        warn!(tool = %name, server, "dropping MCP tool for unconfigured server");
                    }
                    known
                }
                None => {
                    warn!(tool = %name.as_str(), "dropping malformed MCP tool name");
                    false
                }
            })
            .map(String::as_str)
            .collect()
    }
}

/// Split `mcp__<server>__<tool>` into `(server, tool)`.
///
/// Returns None when the prefix is missing or either part is empty.
pub fn parse_tool_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(MCP_TOOL_PREFIX)?;
    let (server, tool) = rest.split_once("__")?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
