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

//! HTTP surface of the node agent.
//!
//! Every request except `/health` must carry the fleet's shared secret, and
//! every path counts as a credential submission: an unauthenticated caller
//! only ever sees the drop response.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRef, State};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use super::auth::{CredentialVerifier, SharedSecretVerifier};
use super::config::FleetConfig;
use super::extract::Authenticated;
use super::gate::{gate_middleware, ConnectionGate, GatePolicy, HEALTH_PATH};
use super::management;
use super::response::ApiError;
use super::security::{DurableBans, ReputationStore};
use crate::shared::clock::SharedClock;

/// Node descriptor served by `/api/node`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub version: &'static str,
    pub started_at: u64,
}

/// Shared state of the agent router.
#[derive(Clone)]
pub struct AgentState {
    pub gate: ConnectionGate,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub node: Arc<NodeInfo>,
}

impl FromRef<AgentState> for ConnectionGate {
    fn from_ref(state: &AgentState) -> Self {
        state.gate.clone()
    }
}

impl FromRef<AgentState> for Arc<dyn CredentialVerifier> {
    fn from_ref(state: &AgentState) -> Self {
        Arc::clone(&state.verifier)
    }
}

impl AgentState {
    /// Build the agent's state from configuration.
    ///
    /// The agent keeps reputation in memory only.
    pub fn from_config(config: &FleetConfig, clock: SharedClock) -> Result<Self> {
        let verifier = SharedSecretVerifier::new(&config.agent.shared_secret)?;
        let reputation = ReputationStore::with_clock(config.security.reputation(), Arc::clone(&clock));
        let policy = GatePolicy::agent().with_trust_proxy_headers(config.security.trust_proxy_headers);

        let name = if config.agent.node_name.is_empty() {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "fleetguard-agent".to_string())
        } else {
            config.agent.node_name.clone()
        };

        Ok(Self {
            gate: ConnectionGate::new(reputation, DurableBans::disabled(), policy),
            verifier: Arc::new(verifier),
            node: Arc::new(NodeInfo {
                name,
                version: env!("CARGO_PKG_VERSION"),
                started_at: clock.now(),
            }),
        })
    }
}

/// Build the agent router with the gate applied to every route.
pub fn router(state: AgentState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route("/api/node", get(node))
        .merge(management::routes())
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.gate.clone(), gate_middleware))
        .with_state(state)
}

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn node(
    Authenticated(identity): Authenticated,
    State(state): State<AgentState>,
) -> Json<Value> {
    Json(json!({
        "node": state.node.as_ref(),
        "caller": identity.subject,
    }))
}

/// Unknown paths still require a credential before answering 404.
pub(crate) async fn not_found(Authenticated(_): Authenticated) -> ApiError {
    ApiError::NotFound("no such endpoint".to_string())
}
