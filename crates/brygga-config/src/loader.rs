// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/brygga/config.yaml"));
    paths.push(PathBuf::from("/etc/brygga/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/brygga/config.yaml"));
        paths.push(home.join(".config/brygga/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("brygga/config.yaml"));
        paths.push(cfg.join("brygga/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".brygga.yaml"));
    paths.push(PathBuf::from(".brygga.yml"));
    paths.push(PathBuf::from("brygga.yaml"));
    paths.push(PathBuf::from("brygga.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment overrides.  The `extra` argument may provide an explicit path
/// (e.g. `--config` CLI flag), which becomes the highest-priority file layer.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Apply environment-variable overrides on top of the file-derived config.
///
/// The lookup is injected so tests can supply a map instead of mutating the
/// process environment.  Environment always wins over file layers.
pub fn apply_env_overrides(config: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("HOST") {
        config.http.host = v;
    }
    if let Some(v) = get("PORT") {
        match v.parse() {
            Ok(p) => config.http.port = p,
            Err(_) => warn!(value = %v, "ignoring unparseable PORT"),
        }
    }
    if let Some(v) = get("CLAUDE_BINARY") {
        config.child.binary = v;
    }
    parse_ms(&get, "CLAUDE_TOTAL_TIMEOUT_MS", &mut config.child.total_timeout_ms);
    parse_ms(
        &get,
        "CLAUDE_INACTIVITY_TIMEOUT_MS",
        &mut config.child.inactivity_timeout_ms,
    );
    parse_ms(&get, "PROCESS_KILL_TIMEOUT_MS", &mut config.child.kill_grace_ms);
    if let Some(v) = get("WORKSPACE_BASE_PATH") {
        config.workspace.base_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get("MCP_CONFIG_PATH") {
        config.mcp.config_path = Some(PathBuf::from(v));
    }
    // API_KEYS (comma-separated) takes precedence over the single-key form.
    if let Some(v) = get("API_KEYS") {
        config.auth.api_keys = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    } else if let Some(v) = get("API_KEY") {
        let v = v.trim();
        config.auth.api_keys = if v.is_empty() {
            Vec::new()
        } else {
            vec![v.to_string()]
        };
    }
    if let Some(v) = get("SHOW_THINKING") {
        config.stream.show_thinking = matches!(v.as_str(), "1" | "true" | "yes");
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.log.level = v;
    }
    if let Some(v) = get("NODE_ENV") {
        config.log.environment = v;
    }
}

fn parse_ms(get: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut u64) {
    if let Some(v) = get(name) {
        match v.parse() {
            Ok(ms) => *slot = ms,
            Err(_) => warn!(var = name, value = %v, "ignoring unparseable timeout override"),
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
