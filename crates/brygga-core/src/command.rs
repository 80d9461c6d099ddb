// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Child argv construction.
//!
//! The prompt is deliberately absent from the argument list — argv is
//! visible to every user on the host via /proc, and prompts routinely carry
//! source code.  It travels over stdin instead (see the supervisor).

use std::path::Path;

use brygga_mcp::{McpRegistry, MCP_TOOL_PREFIX};

use crate::NormalizedRequest;

/// Build the argument sequence for spawning the child agent.
///
/// Layout, in order:
/// `-p --verbose --output-format stream-json`
/// `[--resume <token>] [--dangerously-skip-permissions]`
/// `[--system-prompt <text>] [--mcp-config <path>]`
/// `[--allowedTools <comma-joined>] [--disallowedTools <comma-joined>]`
///
/// MCP-prefixed names (from either the allowed list or the dedicated MCP
/// list) survive only when their server is configured; `--mcp-config` is
/// attached only when at least one survives.  Disallowed tools are passed
/// verbatim without validation — denying an unknown tool is harmless.
pub fn build_child_args(
    request: &NormalizedRequest,
    mcp: &McpRegistry,
    mcp_config_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-p".into(),
        "--verbose".into(),
        "--output-format".into(),
        "stream-json".into(),
    ];

    if let Some(token) = &request.session_id {
        args.push("--resume".into());
        args.push(token.clone());
    }
    if request.skip_permissions {
        args.push("--dangerously-skip-permissions".into());
    }
    if let Some(system_prompt) = &request.system_prompt {
        args.push("--system-prompt".into());
        args.push(system_prompt.clone());
    }

    // Partition the allowed list into regular and MCP-prefixed names, then
    // append the dedicated MCP list to the MCP partition.
    let (mcp_requested, regular): (Vec<&String>, Vec<&String>) = request
        .allowed_tools
        .iter()
        .partition(|t| t.starts_with(MCP_TOOL_PREFIX));
    let mut mcp_requested: Vec<String> = mcp_requested.into_iter().cloned().collect();
    mcp_requested.extend(request.mcp_allowed_tools.iter().cloned());

    let validated: Vec<String> = mcp
        .validate_tools(&mcp_requested)
        .into_iter()
        .map(String::from)
        .collect();

    if !validated.is_empty() {
        args.push("--mcp-config".into());
        args.push(mcp_config_path.display().to_string());
    }

    let mut allowed: Vec<String> = regular.into_iter().cloned().collect();
    allowed.extend(validated);
    if !allowed.is_empty() {
        args.push("--allowedTools".into());
        args.push(allowed.join(","));
    }

    if !request.disallowed_tools.is_empty() {
        args.push("--disallowedTools".into());
        args.push(request.disallowed_tools.join(","));
    }

    args
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    fn mcp_with(servers: &str) -> McpRegistry {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{servers}").unwrap();
        McpRegistry::load(f.path()).unwrap()
    }

    fn cfg_path() -> PathBuf {
        PathBuf::from("/etc/brygga/mcp-config.json")
    }

    #[test]
    fn minimal_request_gets_fixed_leading_args_only() {
        let req = NormalizedRequest {
            prompt: "hi".into(),
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        assert_eq!(args, vec!["-p", "--verbose", "--output-format", "stream-json"]);
    }

    #[test]
    fn prompt_never_appears_in_argv() {
        let req = NormalizedRequest {
            prompt: "secret prompt text".into(),
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        assert!(args.iter().all(|a| !a.contains("secret")));
    }

    #[test]
    fn resume_and_skip_permissions_flags() {
        let req = NormalizedRequest {
            prompt: "hi".into(),
            session_id: Some("xyz".into()),
            skip_permissions: true,
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        let resume_at = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[resume_at + 1], "xyz");
        assert!(args.iter().any(|a| a == "--dangerously-skip-permissions"));
    }

    #[test]
    fn system_prompt_is_forwarded() {
        let req = NormalizedRequest {
            prompt: "hi".into(),
            system_prompt: Some("be terse".into()),
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        let at = args.iter().position(|a| a == "--system-prompt").unwrap();
        assert_eq!(args[at + 1], "be terse");
    }

    #[test]
    fn regular_tools_join_with_commas() {
        let req = NormalizedRequest {
            prompt: "hi".into(),
            allowed_tools: vec!["Bash".into(), "Read".into()],
            disallowed_tools: vec!["Write".into()],
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        let at = args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(args[at + 1], "Bash,Read");
        let dt = args.iter().position(|a| a == "--disallowedTools").unwrap();
        assert_eq!(args[dt + 1], "Write");
    }

    #[test]
    fn mcp_config_attached_only_when_validated_tools_survive() {
        let reg = mcp_with(r#"{"mcpServers":{"github":{}}}"#);

        // Unknown server: no --mcp-config, no --allowedTools.
        let req = NormalizedRequest {
            prompt: "hi".into(),
            mcp_allowed_tools: vec!["mcp__jira__create".into()],
            ..Default::default()
        };
        let args = build_child_args(&req, &reg, &cfg_path());
        assert!(!args.iter().any(|a| a == "--mcp-config"));
        assert!(!args.iter().any(|a| a == "--allowedTools"));

        // Known server: both appear, config path first.
        let req = NormalizedRequest {
            prompt: "hi".into(),
            mcp_allowed_tools: vec!["mcp__github__search".into()],
            ..Default::default()
        };
        let args = build_child_args(&req, &reg, &cfg_path());
        let mc = args.iter().position(|a| a == "--mcp-config").unwrap();
        assert_eq!(args[mc + 1], "/etc/brygga/mcp-config.json");
        let at = args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(args[at + 1], "mcp__github__search");
    }

    #[test]
    fn allowed_list_partition_regular_before_validated_mcp() {
        let reg = mcp_with(r#"{"mcpServers":{"gh":{}}}"#);
        let req = NormalizedRequest {
            prompt: "hi".into(),
            allowed_tools: vec!["mcp__gh__pr".into(), "Bash".into(), "mcp__bad__x".into()],
            mcp_allowed_tools: vec!["mcp__gh__issue".into()],
            ..Default::default()
        };
        let args = build_child_args(&req, &reg, &cfg_path());
        let at = args.iter().position(|a| a == "--allowedTools").unwrap();
        // Regular names first, then validated MCP names in request order.
        assert_eq!(args[at + 1], "Bash,mcp__gh__pr,mcp__gh__issue");
    }

    #[test]
    fn disallowed_tools_skip_mcp_validation() {
        // Disallowed names pass through verbatim even for unknown servers.
        let req = NormalizedRequest {
            prompt: "hi".into(),
            disallowed_tools: vec!["mcp__unknown__tool".into()],
            ..Default::default()
        };
        let args = build_child_args(&req, &McpRegistry::empty(), &cfg_path());
        let dt = args.iter().position(|a| a == "--disallowedTools").unwrap();
        assert_eq!(args[dt + 1], "mcp__unknown__tool");
    }
}
