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

//! Configuration loader for fleetguard.
//!
//! This module handles loading configuration from multiple sources with
//! the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Configuration file (YAML)
//! 4. Default values

use super::types::FleetConfig;
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Which process a configuration is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Node agent (shared secret scheme).
    Agent,
    /// Central panel (password + session scheme).
    Panel,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::Panel => write!(f, "panel"),
        }
    }
}

/// Load configuration from file and environment, then validate it for `role`.
///
/// # Arguments
///
/// * `config_path` - Optional path to configuration file. If None, searches default locations.
/// * `role` - Process the configuration is for
///
/// # Default Locations
///
/// If no config path is specified, searches in order:
/// 1. `./fleetguard.yaml` (current directory)
/// 2. `/etc/fleetguard/fleetguard.yaml` (system-wide)
/// 3. `$XDG_CONFIG_HOME/fleetguard/fleetguard.yaml` (user-specific)
///
/// # Environment Variables
///
/// - `FLEETGUARD_PORT` - Listener port
/// - `FLEETGUARD_BIND_ADDRESS` - Bind address
/// - `FLEETGUARD_FAILURE_THRESHOLD` - Failures before ban
/// - `FLEETGUARD_BAN_DURATION` - Ban duration in seconds
/// - `FLEETGUARD_TRUST_PROXY_HEADERS` - "true" or "false"
/// - `FLEETGUARD_WHITELIST_IPS` - Comma-separated addresses
/// - `FLEETGUARD_SHARED_SECRET` - Agent shared secret
/// - `FLEETGUARD_NODE_NAME` - Agent node name
/// - `FLEETGUARD_PASSWORD` - Panel password (hash or plaintext)
/// - `FLEETGUARD_SIGNING_SECRET` - Panel session signing secret
/// - `FLEETGUARD_DATABASE` - Panel ban database path
///
/// # Example
///
/// ```no_run
/// use fleetguard::server::config::{load_config, Role};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = load_config(None, Role::Agent)?;
/// let config = load_config(Some("/etc/fleetguard/custom.yaml".as_ref()), Role::Panel)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - Configuration file cannot be read or parsed
/// - Environment variables have invalid values
/// - Configuration validation fails
pub fn load_config(config_path: Option<&Path>, role: Role) -> Result<FleetConfig> {
    let mut config = FleetConfig::default();

    if let Some(path) = config_path {
        config = load_config_file(path).context("Failed to load configuration file")?;
        tracing::info!(path = %path.display(), "Loaded configuration from file");
    } else {
        for path in default_config_paths() {
            if path.exists() {
                config = load_config_file(&path).context("Failed to load configuration file")?;
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                break;
            }
        }
    }

    config = apply_env_overrides(config)?;

    validate_config(&config, role)?;

    Ok(config)
}

/// Generate a configuration template as YAML string.
///
/// # Example
///
/// ```
/// use fleetguard::server::config::generate_config_template;
///
/// let template = generate_config_template();
/// assert!(template.contains("security:"));
/// ```
pub fn generate_config_template() -> String {
    let config = FleetConfig::default();
    let mut yaml = String::new();

    yaml.push_str("# fleetguard configuration file\n");
    yaml.push_str("#\n");
    yaml.push_str("# Shared by fleetguard-agent and fleetguard-panel; each reads its own section.\n");
    yaml.push_str("#\n");
    yaml.push_str("# Configuration hierarchy (highest to lowest precedence):\n");
    yaml.push_str("# 1. CLI arguments\n");
    yaml.push_str("# 2. Environment variables (FLEETGUARD_* prefix)\n");
    yaml.push_str("# 3. This configuration file\n");
    yaml.push_str("# 4. Default values\n");
    yaml.push_str("#\n");
    yaml.push_str("# panel.password accepts an Argon2 hash from `fleetguard-panel hash-password`.\n");
    yaml.push_str("# An empty panel.signing_secret generates a random secret at startup.\n\n");

    yaml.push_str(&serde_yaml::to_string(&config).unwrap_or_default());

    yaml
}

/// Load configuration from a YAML file.
fn load_config_file(path: &Path) -> Result<FleetConfig> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))
}

/// Get default configuration file search paths.
fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("./fleetguard.yaml"));
    paths.push(PathBuf::from("/etc/fleetguard/fleetguard.yaml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("fleetguard/fleetguard.yaml"));
    }

    paths
}

/// Apply environment variable overrides to configuration.
fn apply_env_overrides(mut config: FleetConfig) -> Result<FleetConfig> {
    if let Ok(port_str) = std::env::var("FLEETGUARD_PORT") {
        config.server.port = port_str
            .parse()
            .context(format!("Invalid FLEETGUARD_PORT value: {port_str}"))?;
        tracing::debug!(port = config.server.port, "Applied FLEETGUARD_PORT override");
    }

    if let Ok(addr) = std::env::var("FLEETGUARD_BIND_ADDRESS") {
        tracing::debug!(address = %addr, "Applied FLEETGUARD_BIND_ADDRESS override");
        config.server.bind_address = addr;
    }

    if let Ok(value) = std::env::var("FLEETGUARD_FAILURE_THRESHOLD") {
        config.security.failure_threshold = value
            .parse()
            .context(format!("Invalid FLEETGUARD_FAILURE_THRESHOLD value: {value}"))?;
        tracing::debug!(
            threshold = config.security.failure_threshold,
            "Applied FLEETGUARD_FAILURE_THRESHOLD override"
        );
    }

    if let Ok(value) = std::env::var("FLEETGUARD_BAN_DURATION") {
        config.security.ban_duration = value
            .parse()
            .context(format!("Invalid FLEETGUARD_BAN_DURATION value: {value}"))?;
        tracing::debug!(
            ban_duration = config.security.ban_duration,
            "Applied FLEETGUARD_BAN_DURATION override"
        );
    }

    if let Ok(value) = std::env::var("FLEETGUARD_TRUST_PROXY_HEADERS") {
        config.security.trust_proxy_headers = value
            .trim()
            .parse()
            .context(format!("Invalid FLEETGUARD_TRUST_PROXY_HEADERS value: {value}"))?;
    }

    // Comma-separated list
    if let Ok(ips) = std::env::var("FLEETGUARD_WHITELIST_IPS") {
        config.security.whitelist_ips = ips
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        tracing::debug!(
            count = config.security.whitelist_ips.len(),
            "Applied FLEETGUARD_WHITELIST_IPS override"
        );
    }

    // Secrets are never echoed to the log.
    if let Ok(secret) = std::env::var("FLEETGUARD_SHARED_SECRET") {
        config.agent.shared_secret = secret;
        tracing::debug!("Applied FLEETGUARD_SHARED_SECRET override");
    }

    if let Ok(name) = std::env::var("FLEETGUARD_NODE_NAME") {
        config.agent.node_name = name;
    }

    if let Ok(password) = std::env::var("FLEETGUARD_PASSWORD") {
        config.panel.password = password;
        tracing::debug!("Applied FLEETGUARD_PASSWORD override");
    }

    if let Ok(secret) = std::env::var("FLEETGUARD_SIGNING_SECRET") {
        config.panel.signing_secret = secret;
        tracing::debug!("Applied FLEETGUARD_SIGNING_SECRET override");
    }

    if let Ok(path) = std::env::var("FLEETGUARD_DATABASE") {
        config.panel.database = PathBuf::from(path);
    }

    Ok(config)
}

/// Validate configuration for correctness.
///
/// Listener and security settings are always checked; the agent and panel
/// sections only for their own role.
pub fn validate_config(config: &FleetConfig, role: Role) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.security.failure_threshold == 0 {
        anyhow::bail!("failure_threshold must be greater than 0");
    }

    if config.security.ban_duration == 0 {
        anyhow::bail!("ban_duration must be greater than 0");
    }

    for ip in &config.security.whitelist_ips {
        ip.trim()
            .parse::<IpAddr>()
            .context(format!("Invalid IP address in whitelist_ips: {ip}"))?;
    }

    match role {
        Role::Agent => {
            if config.agent.shared_secret.is_empty() {
                anyhow::bail!(
                    "agent.shared_secret must be configured (or FLEETGUARD_SHARED_SECRET)"
                );
            }
        }
        Role::Panel => {
            if config.panel.password.is_empty() {
                anyhow::bail!("panel.password must be configured (or FLEETGUARD_PASSWORD)");
            }
            if config.panel.admin_user.trim().is_empty() {
                anyhow::bail!("panel.admin_user cannot be empty");
            }
            if config.panel.token_validity_minutes == 0 {
                anyhow::bail!("token_validity_minutes must be greater than 0");
            }
        }
    }

    tracing::info!(role = %role, "Configuration validation passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn agent_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.agent.shared_secret = "fleet-key".to_string();
        config
    }

    fn panel_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.panel.password = "hunter2".to_string();
        config
    }

    #[test]
    fn test_generate_config_template() {
        let template = generate_config_template();
        assert!(template.contains("fleetguard configuration"));
        assert!(template.contains("server:"));
        assert!(template.contains("security:"));
        assert!(template.contains("agent:"));
        assert!(template.contains("panel:"));

        // Template should be valid YAML
        let parsed: Result<FleetConfig, _> = serde_yaml::from_str(&template);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let yaml_content = r#"
server:
  port: 9443
  bind_address: "127.0.0.1"
security:
  failure_threshold: 3
  ban_duration: 60
agent:
  shared_secret: "fleet-key"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config_file(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.security.failure_threshold, 3);
        assert_eq!(config.agent.shared_secret, "fleet-key");
    }

    #[test]
    fn test_load_config_rejects_bad_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"server: [not, a, map]").unwrap();
        temp_file.flush().unwrap();

        assert!(load_config_file(temp_file.path()).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_port() {
        std::env::remove_var("FLEETGUARD_PORT");

        std::env::set_var("FLEETGUARD_PORT", "9000");
        let config = apply_env_overrides(FleetConfig::default()).unwrap();
        assert_eq!(config.server.port, 9000);
        std::env::remove_var("FLEETGUARD_PORT");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_invalid_port() {
        std::env::remove_var("FLEETGUARD_PORT");

        std::env::set_var("FLEETGUARD_PORT", "invalid");
        let result = apply_env_overrides(FleetConfig::default());
        assert!(result.is_err());
        std::env::remove_var("FLEETGUARD_PORT");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_security() {
        std::env::set_var("FLEETGUARD_FAILURE_THRESHOLD", "2");
        std::env::set_var("FLEETGUARD_TRUST_PROXY_HEADERS", "false");
        std::env::set_var("FLEETGUARD_WHITELIST_IPS", "127.0.0.1, ::1,");
        let config = apply_env_overrides(FleetConfig::default()).unwrap();
        assert_eq!(config.security.failure_threshold, 2);
        assert!(!config.security.trust_proxy_headers);
        assert_eq!(config.security.whitelist_ips, vec!["127.0.0.1", "::1"]);
        std::env::remove_var("FLEETGUARD_FAILURE_THRESHOLD");
        std::env::remove_var("FLEETGUARD_TRUST_PROXY_HEADERS");
        std::env::remove_var("FLEETGUARD_WHITELIST_IPS");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override_secrets() {
        std::env::set_var("FLEETGUARD_SHARED_SECRET", "from-env");
        std::env::set_var("FLEETGUARD_PASSWORD", "env-password");
        let config = apply_env_overrides(FleetConfig::default()).unwrap();
        assert_eq!(config.agent.shared_secret, "from-env");
        assert_eq!(config.panel.password, "env-password");
        std::env::remove_var("FLEETGUARD_SHARED_SECRET");
        std::env::remove_var("FLEETGUARD_PASSWORD");
    }

    #[test]
    fn test_validate_agent_requires_secret() {
        let result = validate_config(&FleetConfig::default(), Role::Agent);
        assert!(result.unwrap_err().to_string().contains("shared_secret"));
        assert!(validate_config(&agent_config(), Role::Agent).is_ok());
    }

    #[test]
    fn test_validate_panel_requires_password() {
        let result = validate_config(&FleetConfig::default(), Role::Panel);
        assert!(result.unwrap_err().to_string().contains("panel.password"));
        assert!(validate_config(&panel_config(), Role::Panel).is_ok());

        // The agent does not care about panel settings
        assert!(validate_config(&agent_config(), Role::Agent).is_ok());
    }

    #[test]
    fn test_validate_config_zero_port() {
        let mut config = agent_config();
        config.server.port = 0;

        let result = validate_config(&config, Role::Agent);
        assert!(result.unwrap_err().to_string().contains("port cannot be 0"));
    }

    #[test]
    fn test_validate_config_zero_threshold_and_ban() {
        let mut config = agent_config();
        config.security.failure_threshold = 0;
        assert!(validate_config(&config, Role::Agent).is_err());

        let mut config = agent_config();
        config.security.ban_duration = 0;
        assert!(validate_config(&config, Role::Agent).is_err());
    }

    #[test]
    fn test_validate_config_invalid_whitelist() {
        let mut config = agent_config();
        config.security.whitelist_ips.push("10.0.0.0/8".to_string());

        let result = validate_config(&config, Role::Agent);
        assert!(result.unwrap_err().to_string().contains("whitelist_ips"));
    }

    #[test]
    fn test_validate_panel_zero_validity() {
        let mut config = panel_config();
        config.panel.token_validity_minutes = 0;
        assert!(validate_config(&config, Role::Panel).is_err());
    }
}
