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

//! Configuration types for the fleetguard agent and panel.
//!
//! Both processes read the same schema; each only validates the section it
//! uses.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::server::security::ReputationConfig;

/// Main configuration loaded from YAML files.
///
/// # Example YAML
///
/// ```yaml
/// server:
///   bind_address: "0.0.0.0"
///   port: 8443
///
/// security:
///   failure_threshold: 5
///   ban_duration: 3600
///   whitelist_ips:
///     - 127.0.0.1
///
/// agent:
///   shared_secret: "change-me"
///   node_name: "edge-01"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Listener settings.
    pub server: ServerSettings,

    /// IP reputation settings.
    pub security: SecurityConfig,

    /// Agent (shared secret) settings.
    pub agent: AgentConfig,

    /// Panel (password + session) settings.
    pub panel: PanelConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to (e.g., "0.0.0.0" or "127.0.0.1").
    ///
    /// Default: "0.0.0.0"
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on.
    ///
    /// Default: 8443
    #[serde(default = "default_port")]
    pub port: u16,
}

/// IP reputation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Failed credential submissions before an address is banned.
    ///
    /// Default: 5
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Ban duration in seconds.
    ///
    /// Default: 3600 (1 hour)
    #[serde(default = "default_ban_duration")]
    pub ban_duration: u64,

    /// Minimum seconds between sweeps of stale records.
    ///
    /// Default: 300 (5 minutes)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client.
    ///
    /// Disable when the process is reachable without a reverse proxy.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub trust_proxy_headers: bool,

    /// IP addresses that are never banned.
    ///
    /// Example: ["127.0.0.1", "::1"]
    #[serde(default)]
    pub whitelist_ips: Vec<String>,
}

/// Agent settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Secret the panel presents in `x-api-key`.
    pub shared_secret: String,

    /// Name reported by `/api/node`. Empty uses the host name.
    pub node_name: String,
}

/// Panel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Administrator subject name.
    ///
    /// Default: "admin"
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    /// Administrator password: an Argon2 PHC hash or a plaintext secret.
    ///
    /// Generate a hash with: `fleetguard-panel hash-password`
    #[serde(default)]
    pub password: String,

    /// Session signing secret. Empty generates a random per-process secret.
    #[serde(default)]
    pub signing_secret: String,

    /// Session validity in minutes.
    ///
    /// Default: 1440 (24 hours)
    #[serde(default = "default_token_validity_minutes")]
    pub token_validity_minutes: u64,

    /// SQLite database holding durable bans.
    ///
    /// Default: "fleetguard.db"
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Minimum wall time of a login attempt in milliseconds.
    ///
    /// Default: 100
    #[serde(default = "default_min_login_duration_ms")]
    pub min_login_duration_ms: u64,
}

impl SecurityConfig {
    /// Parsed whitelist. Entries that do not parse are skipped.
    pub fn whitelist(&self) -> Vec<IpAddr> {
        self.whitelist_ips
            .iter()
            .filter_map(|ip| ip.trim().parse().ok())
            .collect()
    }

    /// Reputation store configuration.
    pub fn reputation(&self) -> ReputationConfig {
        ReputationConfig::new(self.failure_threshold, self.ban_duration)
            .with_cleanup_interval(Duration::from_secs(self.cleanup_interval))
            .with_whitelist(self.whitelist())
    }
}

impl PanelConfig {
    /// Session validity.
    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_minutes.saturating_mul(60))
    }

    /// Minimum login duration.
    pub fn min_login_duration(&self) -> Duration {
        Duration::from_millis(self.min_login_duration_ms)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_ban_duration() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_token_validity_minutes() -> u64 {
    1440
}

fn default_database() -> PathBuf {
    PathBuf::from("fleetguard.db")
}

fn default_min_login_duration_ms() -> u64 {
    100
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            ban_duration: default_ban_duration(),
            cleanup_interval: default_cleanup_interval(),
            trust_proxy_headers: default_true(),
            whitelist_ips: Vec::new(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            admin_user: default_admin_user(),
            password: String::new(),
            signing_secret: String::new(),
            token_validity_minutes: default_token_validity_minutes(),
            database: default_database(),
            min_login_duration_ms: default_min_login_duration_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.security.failure_threshold, 5);
        assert_eq!(config.security.ban_duration, 3600);
        assert_eq!(config.security.cleanup_interval, 300);
        assert!(config.security.trust_proxy_headers);
        assert_eq!(config.panel.admin_user, "admin");
        assert_eq!(config.panel.token_validity_minutes, 1440);
        assert_eq!(config.panel.min_login_duration_ms, 100);
        assert!(config.agent.shared_secret.is_empty());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
security:
  failure_threshold: 3
panel:
  password: "hunter2"
"#;
        let config: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.security.failure_threshold, 3);
        assert_eq!(config.security.ban_duration, 3600);
        assert_eq!(config.panel.password, "hunter2");
        assert_eq!(config.panel.admin_user, "admin");
        assert_eq!(config.server.port, 8443);
    }

    #[test]
    fn test_reputation_config_conversion() {
        let security = SecurityConfig {
            failure_threshold: 3,
            ban_duration: 60,
            cleanup_interval: 10,
            trust_proxy_headers: false,
            whitelist_ips: vec!["127.0.0.1".into(), "bogus".into(), " ::1 ".into()],
        };

        let reputation = security.reputation();
        assert_eq!(reputation.threshold, 3);
        assert_eq!(reputation.ban_duration, Duration::from_secs(60));
        assert_eq!(reputation.cleanup_interval, Duration::from_secs(10));
        assert_eq!(reputation.whitelist.len(), 2);
    }

    #[test]
    fn test_panel_durations() {
        let panel = PanelConfig {
            token_validity_minutes: 30,
            min_login_duration_ms: 250,
            ..PanelConfig::default()
        };
        assert_eq!(panel.token_validity(), Duration::from_secs(1800));
        assert_eq!(panel.min_login_duration(), Duration::from_millis(250));
    }
}
