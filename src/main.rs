// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use brygga_core::ActiveRegistry;
use brygga_gateway::AppState;
use brygga_mcp::McpRegistry;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle subcommands that need no logging or server state first.
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = load_config(&cli)?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
        }
    }

    let config = Arc::new(load_config(&cli)?);
    init_logging(cli.verbose, &config);

    // MCP registry: loaded once, read-only afterwards.  A missing file just
    // disables MCP tools; a malformed one is a startup error the operator
    // should see immediately.
    let base = config.workspace.effective_base();
    let mcp_path = config.mcp.effective_path(&base);
    let mcp = Arc::new(McpRegistry::load_or_empty(&mcp_path)?);
    if !mcp.is_empty() {
        tracing::info!(servers = ?mcp.server_names(), "MCP servers configured");
    }

    let registry = ActiveRegistry::new();
    let state = AppState::new(config.clone(), mcp, registry.clone());

    tracing::info!(
        binary = %config.child.binary,
        workspace_base = %base.display(),
        auth = config.auth.enabled(),
        "starting brygga",
    );

    brygga_gateway::serve(state, shutdown_signal(registry)).await
}

fn load_config(cli: &Cli) -> anyhow::Result<brygga_config::Config> {
    let mut config = brygga_config::load(cli.config.as_deref())?;
    // CLI flags are the last layer, above files and environment.
    if let Some(host) = &cli.host {
        config.http.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    Ok(config)
}

/// Resolves on SIGINT/SIGTERM after cancelling every live supervisor, so
/// children never outlive the gateway.
async fn shutdown_signal(registry: ActiveRegistry) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGTERM handler");
                return std::future::pending::<()>().await;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGINT handler");
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            _ = sigint.recv()  => tracing::info!("SIGINT received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    registry.cancel_all();
    // Give two-phase termination a moment before the accept loop stops;
    // in-flight responses still drain through graceful shutdown.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}

fn init_logging(verbosity: u8, config: &brygga_config::Config) {
    // Precedence: RUST_LOG > LOG_LEVEL (already folded into config.log.level
    // by the env override pass) > -v flags.
    let level = match verbosity {
        0 => config.log.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.log.is_production() {
        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .try_init();
    }
}
