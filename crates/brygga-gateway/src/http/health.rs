// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Readiness probe.
//!
//! Three checks, graded:
//! - child binary resolvable → hard requirement (unhealthy / 503 when
//!   missing: no request can possibly succeed);
//! - workspace base writable → hard requirement;
//! - MCP config readable → soft (degraded: requests work, MCP tools don't).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::http::AppState;

/// GET /health handler.
pub async fn handler(State(state): State<AppState>) -> Response {
    let base = state.config.workspace.effective_base();

    let binary_ok = binary_available(&state.config.child.binary);
    let workspace_ok = workspace_writable(&base);
    let mcp_path = state.config.mcp.effective_path(&base);
    let mcp_status = if !mcp_path.exists() {
        "missing"
    } else if brygga_mcp::McpRegistry::load(&mcp_path).is_ok() {
        "ok"
    } else {
        "unreadable"
    };

    let status = if !binary_ok || !workspace_ok {
        "unhealthy"
    } else if mcp_status != "ok" {
        "degraded"
    } else {
        "healthy"
    };

    let body: Value = json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "active_supervisors": state.registry.len(),
        "checks": {
            "child_binary": {
                "ok": binary_ok,
                "binary": state.config.child.binary,
            },
            "workspace": {
                "ok": workspace_ok,
                "base": base.display().to_string(),
            },
            "mcp_config": {
                "status": mcp_status,
                "path": mcp_path.display().to_string(),
            },
        },
    });

    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body)).into_response()
}

/// Is the configured child binary executable — as an absolute/relative
/// path, or somewhere on PATH?
fn binary_available(binary: &str) -> bool {
    if binary.contains('/') {
        return is_executable(std::path::Path::new(binary));
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| is_executable(&dir.join(binary)))
}

fn is_executable(path: &std::path::Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Can we create the workspace base and write into it?
fn workspace_writable(base: &std::path::Path) -> bool {
    if std::fs::create_dir_all(base).is_err() {
        return false;
    }
    let probe = base.join(".brygga-health-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
