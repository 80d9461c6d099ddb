// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

/// brygga — HTTP gateway for a local coding agent.
///
/// Spawns the agent CLI per request and streams its line-JSON output back
/// over SSE, either verbatim (`POST /api/claude`) or transcoded into
/// OpenAI chat-completion chunks (`POST /v1/chat/completions`).
///
/// With no subcommand, starts the server.
#[derive(Parser, Debug)]
#[command(name = "brygga", version, about, max_term_width = 100)]
pub struct Cli {
    /// Path to an explicit config file (highest-priority layer).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Bind address override (also: HOST env var).
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port override (also: PORT env var).
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged effective configuration and exit.
    ///
    /// Shows the result of all config layers plus environment overrides —
    /// what the server would actually run with.
    ShowConfig,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Print completions for the given shell to stdout.
pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["brygga"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from(["brygga", "-c", "/tmp/cfg.yaml", "-p", "8080", "-vv"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cfg.yaml")));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn cli_parses_show_config_subcommand() {
        let cli = Cli::parse_from(["brygga", "show-config"]);
        assert!(matches!(cli.command, Some(Commands::ShowConfig)));
    }

    #[test]
    fn clap_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
