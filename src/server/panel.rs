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

//! HTTP surface of the central panel.
//!
//! Humans log in at `/api/auth/login` with the administrator password and
//! receive a session cookie. Only the login path counts as a credential
//! submission; a stale session elsewhere gets a structured 401 so the UI can
//! send the user back to the login form.
//!
//! Durable bans survive restarts: [`reconcile_bans`] seeds the in-memory
//! store from the database when the panel starts.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{FromRef, State};
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};

use super::agent::{health, not_found};
use super::auth::{
    expired_session_cookie, session_cookie, CredentialVerifier, PasswordSessionVerifier,
    TokenService,
};
use super::config::FleetConfig;
use super::extract::Authenticated;
use super::gate::{gate_middleware, ClientIp, ConnectionGate, GatePolicy, HEALTH_PATH, LOGIN_PATH};
use super::management;
use super::response::ApiError;
use super::security::{BanMirror, DurableBans, ReputationStore, SqliteBanMirror};
use crate::shared::auth_types::Identity;
use crate::shared::clock::SharedClock;

/// Shared state of the panel router.
#[derive(Clone)]
pub struct PanelState {
    pub gate: ConnectionGate,
    pub sessions: Arc<PasswordSessionVerifier>,
}

impl FromRef<PanelState> for ConnectionGate {
    fn from_ref(state: &PanelState) -> Self {
        state.gate.clone()
    }
}

impl FromRef<PanelState> for Arc<dyn CredentialVerifier> {
    fn from_ref(state: &PanelState) -> Self {
        state.sessions.clone()
    }
}

impl PanelState {
    /// Assemble panel state from its parts.
    pub fn new(
        reputation: ReputationStore,
        durable: DurableBans,
        tokens: TokenService,
        config: &FleetConfig,
    ) -> Result<Self> {
        let sessions = PasswordSessionVerifier::new(
            config.panel.admin_user.clone(),
            &config.panel.password,
            tokens,
            reputation.clone(),
            durable.clone(),
        )?
        .with_min_login_duration(config.panel.min_login_duration());

        let policy =
            GatePolicy::panel().with_trust_proxy_headers(config.security.trust_proxy_headers);

        Ok(Self {
            gate: ConnectionGate::new(reputation, durable, policy),
            sessions: Arc::new(sessions),
        })
    }

    /// Build the panel's state from configuration.
    ///
    /// Opens the ban database (continuing memory-only if it cannot be
    /// opened), sets up session signing and reconciles durable bans into
    /// memory.
    pub async fn from_config(config: &FleetConfig, clock: SharedClock) -> Result<Self> {
        let reputation_config = config.security.reputation();
        let reputation = ReputationStore::with_clock(reputation_config.clone(), Arc::clone(&clock));

        let durable = match SqliteBanMirror::open(
            &config.panel.database,
            reputation_config.threshold,
            reputation_config.ban_duration,
            Arc::clone(&clock),
        ) {
            Ok(mirror) => {
                tracing::info!(path = %config.panel.database.display(), "Opened ban database");
                let mirror: Arc<dyn BanMirror> = Arc::new(mirror);
                DurableBans::new(mirror)
            }
            Err(e) => {
                tracing::warn!(
                    path = %config.panel.database.display(),
                    error = %e,
                    "Ban database unavailable, bans will not survive restarts"
                );
                DurableBans::disabled()
            }
        };

        let validity = config.panel.token_validity();
        let tokens = if config.panel.signing_secret.is_empty() {
            tracing::warn!("No signing secret configured, sessions will not survive restarts");
            TokenService::with_random_secret(validity, Arc::clone(&clock))?
        } else {
            TokenService::new(config.panel.signing_secret.as_bytes(), validity, clock)?
        };

        let state = Self::new(reputation, durable, tokens, config)?;
        reconcile_bans(&state.gate).await;
        Ok(state)
    }
}

/// Seed the in-memory store from open durable bans.
///
/// Elapsed rows are purged first.
///
/// # Returns
///
/// The number of addresses restored.
pub async fn reconcile_bans(gate: &ConnectionGate) -> usize {
    let rows = gate.durable().startup_sweep().await;
    for row in &rows {
        gate.reputation()
            .restore(&row.ip, row.attempts, row.last_attempt, row.banned_until)
            .await;
    }
    if !rows.is_empty() {
        tracing::info!(restored = rows.len(), "Restored persisted bans");
    }
    rows.len()
}

/// Build the panel router with the gate applied to every route.
pub fn router(state: PanelState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(LOGIN_PATH, post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
        .merge(management::routes())
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.gate.clone(), gate_middleware))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    subject: String,
    expires_at: u64,
}

async fn login(
    State(state): State<PanelState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Response, ApiError> {
    // An unreadable body is treated like a missing password.
    let request: LoginRequest = serde_json::from_slice(&body).unwrap_or_default();

    let grant = state.sessions.login(&ip, request.password.as_deref()).await?;
    let cookie = session_cookie(&grant.token, state.sessions.tokens().validity());

    Ok((
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            subject: grant.claims.sub,
            expires_at: grant.claims.exp,
        }),
    )
        .into_response())
}

async fn logout() -> Response {
    // Tokens are stateless; the client forgets it and it lapses at expiry.
    (StatusCode::NO_CONTENT, [(SET_COOKIE, expired_session_cookie())]).into_response()
}

async fn session(Authenticated(identity): Authenticated) -> Json<Identity> {
    Json(identity)
}
