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

//! Connection gate middleware.
//!
//! The gate wraps every route of a process:
//!
//! 1. **Pre-check**: resolve the client address; a banned address gets the
//!    drop response before any handler runs (health and, on the panel, the
//!    login path are exempt).
//! 2. **Dispatch**: the handler runs and may attach an [`AuthFailure`] to its
//!    response.
//! 3. **Post-check**: [`ConnectionGate::decide`] turns the outcome into a
//!    [`GateDecision`]. Failures on credential-submission paths are recorded
//!    against the address and dropped; failures elsewhere pass through as a
//!    structured 401 and are not recorded.
//!
//! An unauthenticated caller on a submission path therefore never learns why
//! it was refused.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use super::response::{drop_response, InternalFault};
use super::security::{resolve_client_ip, DurableBans, ReputationStore, UNKNOWN_CLIENT};
use crate::shared::error::AuthFailure;

/// Health check path, never ban-gated.
pub const HEALTH_PATH: &str = "/health";

/// Panel login path.
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Resolved client address, inserted into request extensions by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .unwrap_or_else(|| ClientIp(UNKNOWN_CLIENT.to_string())))
    }
}

/// Which paths accept credential submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPaths {
    /// Every path (the agent: each request carries the shared secret).
    All,
    /// Only the listed paths (the panel: the login endpoint).
    Exact(Vec<String>),
}

/// Path classification for one process.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    ban_exempt: Vec<String>,
    submission: SubmissionPaths,
    trust_proxy_headers: bool,
}

impl GatePolicy {
    /// Policy for the agent.
    pub fn agent() -> Self {
        Self {
            ban_exempt: vec![HEALTH_PATH.to_string()],
            submission: SubmissionPaths::All,
            trust_proxy_headers: true,
        }
    }

    /// Policy for the panel.
    ///
    /// The login path is exempt from the pre-check so a banned client's login
    /// goes through the same comparison as everyone else's before it is
    /// dropped.
    pub fn panel() -> Self {
        Self {
            ban_exempt: vec![HEALTH_PATH.to_string(), LOGIN_PATH.to_string()],
            submission: SubmissionPaths::Exact(vec![LOGIN_PATH.to_string()]),
            trust_proxy_headers: true,
        }
    }

    /// Set whether forwarding headers are honoured.
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Whether forwarding headers are honoured.
    pub fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    /// Whether `path` skips the ban pre-check.
    pub fn is_ban_exempt(&self, path: &str) -> bool {
        self.ban_exempt.iter().any(|p| p == path)
    }

    /// Whether a failure on `path` counts against the client.
    pub fn is_submission_path(&self, path: &str) -> bool {
        match &self.submission {
            SubmissionPaths::All => true,
            SubmissionPaths::Exact(paths) => paths.iter().any(|p| p == path),
        }
    }
}

/// Post-dispatch verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Return the handler's response unchanged.
    Pass,
    /// Replace it with the drop response.
    Drop,
    /// Count a failure against the address, then drop.
    Record,
}

/// Shared gate state: reputation, durable mirror and path policy.
///
/// Cloning is cheap and shares state.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    reputation: ReputationStore,
    durable: DurableBans,
    policy: Arc<GatePolicy>,
}

impl ConnectionGate {
    /// Create a gate.
    pub fn new(reputation: ReputationStore, durable: DurableBans, policy: GatePolicy) -> Self {
        Self {
            reputation,
            durable,
            policy: Arc::new(policy),
        }
    }

    /// In-memory reputation store.
    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    /// Durable ban mirror (disabled on the agent).
    pub fn durable(&self) -> &DurableBans {
        &self.durable
    }

    /// Path policy.
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Decide what to do with a handler's response.
    ///
    /// # Arguments
    ///
    /// * `path` - Request path
    /// * `status` - Response status
    /// * `failure` - Authentication failure attached by the handler
    /// * `fault` - Whether the handler marked an internal fault
    pub fn decide(
        &self,
        path: &str,
        status: StatusCode,
        failure: Option<AuthFailure>,
        fault: bool,
    ) -> GateDecision {
        if fault || status.is_server_error() {
            return GateDecision::Drop;
        }

        match failure {
            None => GateDecision::Pass,
            Some(AuthFailure::BannedIp) => GateDecision::Drop,
            Some(f) if f.counts_as_attempt() && self.policy.is_submission_path(path) => {
                GateDecision::Record
            }
            Some(_) => GateDecision::Pass,
        }
    }

    /// Count a failure against `ip` in memory and, if enabled, durably.
    ///
    /// The in-memory lock is released before the durable store is touched.
    pub async fn record_failure(&self, ip: &str) -> bool {
        if self.reputation.is_whitelisted(ip) {
            return false;
        }
        let banned = self.reputation.record_failure(ip).await;
        self.durable.record_failure(ip).await;
        banned
    }

    async fn sweep(&self) {
        if let Some(removed) = self.reputation.cleanup().await {
            tracing::trace!(removed = removed, "Reputation sweep finished");
        }
    }
}

/// Gate middleware for `axum::middleware::from_fn_with_state`.
///
/// # Example
///
/// ```
/// use axum::{middleware, routing::get, Router};
/// use fleetguard::server::gate::{gate_middleware, ConnectionGate, GatePolicy};
/// use fleetguard::server::security::{DurableBans, ReputationConfig, ReputationStore};
///
/// let gate = ConnectionGate::new(
///     ReputationStore::new(ReputationConfig::default()),
///     DurableBans::disabled(),
///     GatePolicy::agent(),
/// );
/// let app: Router = Router::new()
///     .route("/health", get(|| async { "ok" }))
///     .layer(middleware::from_fn_with_state(gate, gate_middleware));
/// ```
pub async fn gate_middleware(
    State(gate): State<ConnectionGate>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = resolve_client_ip(req.headers(), peer, gate.policy.trust_proxy_headers);
    let path = req.uri().path().to_string();

    gate.sweep().await;

    if !gate.policy.is_ban_exempt(&path) && gate.reputation.is_banned(&ip).await {
        tracing::trace!(ip = %ip, path = %path, "Dropped request from banned address");
        return drop_response();
    }

    req.extensions_mut().insert(ClientIp(ip.clone()));
    let response = next.run(req).await;

    let failure = response.extensions().get::<AuthFailure>().copied();
    let fault = response.extensions().get::<InternalFault>().is_some();

    match gate.decide(&path, response.status(), failure, fault) {
        GateDecision::Pass => response,
        GateDecision::Drop => {
            if fault || response.status().is_server_error() {
                tracing::debug!(ip = %ip, path = %path, "Dropped response after handler fault");
            }
            drop_response()
        }
        GateDecision::Record => {
            let banned = gate.record_failure(&ip).await;
            tracing::debug!(
                ip = %ip,
                path = %path,
                reason = ?failure,
                banned = banned,
                "Recorded authentication failure"
            );
            drop_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::security::ReputationConfig;

    fn gate(policy: GatePolicy) -> ConnectionGate {
        ConnectionGate::new(
            ReputationStore::new(ReputationConfig::new(3, 60)),
            DurableBans::disabled(),
            policy,
        )
    }

    #[test]
    fn test_agent_policy() {
        let policy = GatePolicy::agent();
        assert!(policy.is_ban_exempt("/health"));
        assert!(!policy.is_ban_exempt("/api/node"));
        assert!(policy.is_submission_path("/api/node"));
        assert!(policy.is_submission_path("/anything"));
    }

    #[test]
    fn test_panel_policy() {
        let policy = GatePolicy::panel();
        assert!(policy.is_ban_exempt("/health"));
        assert!(policy.is_ban_exempt(LOGIN_PATH));
        assert!(!policy.is_ban_exempt("/api/security/bans"));
        assert!(policy.is_submission_path(LOGIN_PATH));
        assert!(!policy.is_submission_path("/api/auth/session"));
    }

    #[test]
    fn test_decide_submission_path() {
        let gate = gate(GatePolicy::panel());
        let unauthorized = StatusCode::UNAUTHORIZED;

        for failure in [
            AuthFailure::MissingCredential,
            AuthFailure::InvalidCredential,
            AuthFailure::InvalidSignature,
            AuthFailure::ExpiredToken,
            AuthFailure::MalformedToken,
        ] {
            assert_eq!(
                gate.decide(LOGIN_PATH, unauthorized, Some(failure), false),
                GateDecision::Record
            );
        }

        assert_eq!(
            gate.decide(LOGIN_PATH, unauthorized, Some(AuthFailure::BannedIp), false),
            GateDecision::Drop
        );
        assert_eq!(
            gate.decide(LOGIN_PATH, StatusCode::OK, None, false),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_decide_other_paths_pass_through() {
        let gate = gate(GatePolicy::panel());
        assert_eq!(
            gate.decide(
                "/api/security/bans",
                StatusCode::UNAUTHORIZED,
                Some(AuthFailure::ExpiredToken),
                false
            ),
            GateDecision::Pass
        );
        assert_eq!(
            gate.decide(
                "/api/security/bans",
                StatusCode::UNAUTHORIZED,
                Some(AuthFailure::InvalidSignature),
                false
            ),
            GateDecision::Pass
        );
    }

    #[test]
    fn test_decide_faults_drop() {
        let gate = gate(GatePolicy::panel());
        assert_eq!(
            gate.decide("/api/auth/session", StatusCode::OK, None, true),
            GateDecision::Drop
        );
        assert_eq!(
            gate.decide("/api/auth/session", StatusCode::BAD_GATEWAY, None, false),
            GateDecision::Drop
        );
    }

    #[tokio::test]
    async fn test_record_failure_skips_whitelist() {
        let gate = ConnectionGate::new(
            ReputationStore::new(
                ReputationConfig::new(1, 60).with_whitelist(vec!["127.0.0.1".parse().unwrap()]),
            ),
            DurableBans::disabled(),
            GatePolicy::agent(),
        );

        assert!(!gate.record_failure("127.0.0.1").await);
        assert!(gate.record_failure("10.0.0.1").await);
        assert_eq!(gate.reputation().tracked_count().await, 1);
    }
}
