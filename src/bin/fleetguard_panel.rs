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

//! fleetguard-panel binary - central panel behind the connection gate

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fleetguard::server::config::{generate_config_template, load_config, FleetConfig, Role};
use fleetguard::server::panel::{router, PanelState};
use fleetguard::server::{serve, shutdown_signal};
use fleetguard::shared::system_clock;
use fleetguard::utils::logging;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use zeroize::Zeroizing;

/// fleetguard central panel
#[derive(Parser, Debug)]
#[command(name = "fleetguard-panel")]
#[command(version)]
#[command(about = "fleetguard panel - administrator login, sessions and durable bans", long_about = None)]
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

    /// Ban database path
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the panel (default)
    Run,

    /// Generate a configuration file template
    GenConfig {
        /// Output path (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Hash the administrator password for configuration
    HashPassword,

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
        None | Some(Commands::Run) => run_panel(&cli).await,
        Some(Commands::GenConfig { ref output }) => gen_config(output.as_ref()),
        Some(Commands::HashPassword) => hash_password(),
        Some(Commands::CheckConfig) => check_config(&cli),
        Some(Commands::Version) => {
            println!("fleetguard-panel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load configuration and apply CLI overrides.
fn resolve_config(cli: &Cli) -> Result<FleetConfig> {
    let mut config = load_config(cli.config.as_deref(), Role::Panel).with_context(|| {
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
    if let Some(database) = &cli.database {
        config.panel.database = database.clone();
    }
    Ok(config)
}

async fn run_panel(cli: &Cli) -> Result<()> {
    tracing::info!("Starting fleetguard-panel");

    let config = resolve_config(cli)?;
    let state = PanelState::from_config(&config, system_clock()).await?;

    tracing::info!(
        admin = %config.panel.admin_user,
        threshold = config.security.failure_threshold,
        ban_duration = config.security.ban_duration,
        durable = state.gate.durable().is_enabled(),
        "Panel configuration loaded"
    );

    serve(router(state), &config.server, shutdown_signal()).await?;

    tracing::info!("Panel stopped");
    Ok(())
}

/// Generate a configuration file template
fn gen_config(output: Option<&PathBuf>) -> Result<()> {
    let template = generate_config_template();

    if let Some(path) = output {
        #[cfg(unix)]
        {
            use std::fs::OpenOptions;
            use std::os::unix::fs::OpenOptionsExt;

            // The file will hold secrets: owner read/write only
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .context("Failed to create configuration file")?;

            file.write_all(template.as_bytes())
                .context("Failed to write configuration file")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, &template).context("Failed to write configuration file")?;
        }

        println!("Configuration template written to {}", path.display());
    } else {
        print!("{}", template);
    }

    Ok(())
}

/// Hash a password for configuration
fn hash_password() -> Result<()> {
    use fleetguard::server::auth::hash_password as generate_hash;
    use rpassword::read_password;

    print!("Enter password: ");
    io::stdout().flush()?;
    let password = Zeroizing::new(read_password()?);

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    if password.len() < 12 {
        println!("\n Warning: Password is shorter than 12 characters.");
        println!("   The panel is reachable from the network; consider a longer password.\n");
    }

    print!("Confirm password: ");
    io::stdout().flush()?;
    let confirm = Zeroizing::new(read_password()?);

    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    let hash = generate_hash(&password).context("Failed to hash password")?;

    println!("\nPassword hash (use in configuration):");
    println!("{}", hash);
    println!("\nExample configuration:");
    println!("panel:");
    println!("  password: \"{}\"", hash);

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
    println!("\nPanel:");
    println!("  Admin user: {}", config.panel.admin_user);
    let kind = if config.panel.password.starts_with("$argon2") {
        "argon2 hash"
    } else {
        "plaintext"
    };
    println!("  Password: {kind}");
    let signing = if config.panel.signing_secret.is_empty() {
        "random per process"
    } else {
        "configured"
    };
    println!("  Signing secret: {signing}");
    println!("  Session validity: {} min", config.panel.token_validity_minutes);
    println!("  Ban database: {}", config.panel.database.display());
    if !config.panel.database.exists() {
        println!("    (will be created on first start)");
    } else if let Err(e) = fs::metadata(&config.panel.database) {
        println!("    (not readable: {e})");
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
        let args = Cli::try_parse_from(["fleetguard-panel", "run"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Run)));

        let args = Cli::try_parse_from(["fleetguard-panel", "gen-config"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::GenConfig { output: None })
        ));

        let args = Cli::try_parse_from(["fleetguard-panel", "gen-config", "-o", "/tmp/fg.yaml"])
            .unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::GenConfig { output: Some(_) })
        ));

        let args = Cli::try_parse_from(["fleetguard-panel", "hash-password"]).unwrap();
        assert!(matches!(args.command, Some(Commands::HashPassword)));
    }

    #[test]
    fn test_database_override() {
        let args =
            Cli::try_parse_from(["fleetguard-panel", "--database", "/var/lib/fg/bans.db"]).unwrap();
        assert_eq!(args.database, Some(PathBuf::from("/var/lib/fg/bans.db")));
    }
}
