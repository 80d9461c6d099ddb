// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! MCP server registry for brygga.
//!
//! The gateway does not implement MCP itself — the child agent does.  This
//! crate only answers one question at request time: *which of the requested
//! `mcp__<server>__<tool>` names refer to a server the operator actually
//! configured?*  Unknown servers are dropped before the tool name ever
//! reaches the child, so a client cannot smuggle a tool name that points at
//! an unconfigured server.
//!
//! The registry is loaded once at startup from the MCP config JSON (the same
//! file the child receives via `--mcp-config`) and is never mutated after.

mod registry;

pub use registry::{McpRegistry, MCP_TOOL_PREFIX};
