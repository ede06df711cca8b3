// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! fleetguard-agent binary - per-node agent behind the connection gate

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fleetguard::server::agent::{router, AgentState};
use fleetguard::server::config::{generate_config_template, load_config, FleetConfig, Role};
use fleetguard::server::{serve, shutdown_signal};
use fleetguard::shared::system_clock;
use fleetguard::utils::logging;
use std::path::PathBuf;

/// fleetguard node agent
#[derive(Parser, Debug)]
#[command(name = "fleetguard-agent")]
#[command(version)]
#[command(about = "fleetguard node agent - serves node data to the panel over a shared secret", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'b', long, global = true, value_name = "ADDR")]
    bind_address: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true, value_name = "PORT")]
    port: Option<u16>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the agent (default)
    Run,

    /// Print a configuration file template
    GenConfig,

    /// Check configuration file for errors
    CheckConfig,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.verbose);

    match cli.command {
        None | Some(Commands::Run) => run_agent(&cli).await,
        Some(Commands::GenConfig) => {
            print!("{}", generate_config_template());
            Ok(())
        }
        Some(Commands::CheckConfig) => check_config(&cli),
        Some(Commands::Version) => {
            println!("fleetguard-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load configuration and apply CLI overrides.
fn resolve_config(cli: &Cli) -> Result<FleetConfig> {
    let mut config = load_config(cli.config.as_deref(), Role::Agent).with_context(|| {
        match &cli.config {
            Some(path) => format!("Failed to load config from {}", path.display()),
            None => "Failed to load configuration".to_string(),
        }
    })?;

    if let Some(bind_address) = &cli.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

async fn run_agent(cli: &Cli) -> Result<()> {
    tracing::info!("Starting fleetguard-agent");

    let config = resolve_config(cli)?;
    let state = AgentState::from_config(&config, system_clock())?;

    tracing::info!(
        node = %state.node.name,
        threshold = config.security.failure_threshold,
        ban_duration = config.security.ban_duration,
        "Agent configuration loaded"
    );

    serve(router(state), &config.server, shutdown_signal()).await?;

    tracing::info!("Agent stopped");
    Ok(())
}

fn check_config(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;

    println!("✓ Configuration is valid\n");
    println!("Listener:");
    println!("  Bind address: {}", config.server.bind_address);
    println!("  Port: {}", config.server.port);
    println!("\nSecurity:");
    println!("  Failure threshold: {}", config.security.failure_threshold);
    println!("  Ban duration: {}s", config.security.ban_duration);
    println!("  Cleanup interval: {}s", config.security.cleanup_interval);
    println!("  Trust proxy headers: {}", config.security.trust_proxy_headers);
    if !config.security.whitelist_ips.is_empty() {
        println!("  Whitelist: {:?}", config.security.whitelist_ips);
    }
    println!("\nAgent:");
    println!("  Shared secret: configured");
    if !config.agent.node_name.is_empty() {
        println!("  Node name: {}", config.agent.node_name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parsing_with_subcommand() {
        let args = Cli::try_parse_from(["fleetguard-agent", "run"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Run)));

        let args = Cli::try_parse_from(["fleetguard-agent", "check-config", "-c", "/tmp/x.yaml"])
            .unwrap();
        assert!(matches!(args.command, Some(Commands::CheckConfig)));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.yaml")));

        let args = Cli::try_parse_from(["fleetguard-agent", "-vv", "-p", "9000"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.verbose, 2);
        assert_eq!(args.port, Some(9000));
    }
}
