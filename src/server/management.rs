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

//! Ban management endpoints, mounted by both processes.
//!
//! - `GET /api/security/bans`: open bans from memory and the durable store
//! - `DELETE /api/security/bans/:ip`: unban one address
//! - `DELETE /api/security/bans`: unban everything
//! - `GET /api/security/config`: effective reputation settings

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{FromRef, Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;

use super::auth::CredentialVerifier;
use super::extract::Authenticated;
use super::gate::ConnectionGate;
use super::response::ApiError;

/// Where a listed ban is known from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BanSource {
    /// In-memory store only.
    Memory,
    /// Durable store only.
    Durable,
    /// Both stores.
    Both,
}

/// One entry in the ban listing.
#[derive(Debug, Clone, Serialize)]
pub struct BanEntry {
    pub ip: String,
    pub failed_attempts: u32,
    pub banned_until: u64,
    pub remaining_secs: u64,
    pub source: BanSource,
}

/// Response of `GET /api/security/bans`.
#[derive(Debug, Serialize)]
pub struct BanListing {
    pub bans: Vec<BanEntry>,
    pub tracked: usize,
}

/// Response of the unban endpoints.
#[derive(Debug, Serialize)]
pub struct UnbanResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_durable: Option<usize>,
}

/// Response of `GET /api/security/config`.
#[derive(Debug, Serialize)]
pub struct SecuritySettings {
    pub failure_threshold: u32,
    pub ban_duration_secs: u64,
    pub cleanup_interval_secs: u64,
    pub whitelist: Vec<String>,
    pub trust_proxy_headers: bool,
    pub durable_store: bool,
}

/// Management routes for a router whose state provides the gate and verifier.
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ConnectionGate: FromRef<S>,
    Arc<dyn CredentialVerifier>: FromRef<S>,
{
    Router::new()
        .route("/api/security/bans", get(list_bans).delete(unban_all))
        .route("/api/security/bans/:ip", delete(unban))
        .route("/api/security/config", get(show_config))
}

async fn list_bans(
    Authenticated(_): Authenticated,
    State(gate): State<ConnectionGate>,
) -> Result<Json<BanListing>, ApiError> {
    let store = gate.reputation();
    let now = store.now();

    let mut bans: BTreeMap<String, BanEntry> = BTreeMap::new();
    for (ip, remaining) in store.banned().await {
        let Some(record) = store.record(&ip).await else {
            continue;
        };
        bans.insert(
            ip.clone(),
            BanEntry {
                ip,
                failed_attempts: record.failed_attempts,
                banned_until: record.banned_until,
                remaining_secs: remaining,
                source: BanSource::Memory,
            },
        );
    }

    for row in gate.durable().active_bans().await {
        match bans.get_mut(&row.ip) {
            Some(entry) => {
                entry.source = BanSource::Both;
                entry.failed_attempts = entry.failed_attempts.max(row.attempts);
                entry.banned_until = entry.banned_until.max(row.banned_until);
                entry.remaining_secs = entry.banned_until.saturating_sub(now);
            }
            None => {
                bans.insert(
                    row.ip.clone(),
                    BanEntry {
                        remaining_secs: row.banned_until.saturating_sub(now),
                        ip: row.ip,
                        failed_attempts: row.attempts,
                        banned_until: row.banned_until,
                        source: BanSource::Durable,
                    },
                );
            }
        }
    }

    Ok(Json(BanListing {
        bans: bans.into_values().collect(),
        tracked: store.tracked_count().await,
    }))
}

async fn unban(
    Authenticated(identity): Authenticated,
    State(gate): State<ConnectionGate>,
    Path(ip): Path<String>,
) -> Result<Json<UnbanResult>, ApiError> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("not an IP address: {ip}")))?;
    let ip = addr.to_string();

    let existed = gate.reputation().unban(&ip).await;
    gate.durable().clear(&ip).await;

    tracing::info!(ip = %ip, by = %identity.subject, "Unban requested");
    Ok(Json(UnbanResult {
        ip: Some(ip),
        removed: usize::from(existed),
        removed_durable: None,
    }))
}

async fn unban_all(
    Authenticated(identity): Authenticated,
    State(gate): State<ConnectionGate>,
) -> Result<Json<UnbanResult>, ApiError> {
    let in_memory = gate.reputation().unban_all().await;
    let durable = gate.durable().clear_all().await;

    tracing::info!(
        by = %identity.subject,
        memory = in_memory,
        durable = durable,
        "Unban of all addresses requested"
    );
    Ok(Json(UnbanResult {
        ip: None,
        removed: in_memory,
        removed_durable: Some(durable),
    }))
}

async fn show_config(
    Authenticated(_): Authenticated,
    State(gate): State<ConnectionGate>,
) -> Json<SecuritySettings> {
    let config = gate.reputation().config();
    Json(SecuritySettings {
        failure_threshold: config.threshold,
        ban_duration_secs: config.ban_duration.as_secs(),
        cleanup_interval_secs: config.cleanup_interval.as_secs(),
        whitelist: config.whitelist.iter().map(ToString::to_string).collect(),
        trust_proxy_headers: gate.policy().trusts_proxy_headers(),
        durable_store: gate.durable().is_enabled(),
    })
}
