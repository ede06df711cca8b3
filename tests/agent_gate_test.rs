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

//! End-to-end tests of the agent router behind the connection gate.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use fleetguard::server::agent::{router, AgentState};
use fleetguard::server::config::FleetConfig;
use fleetguard::server::response::DROP_STATUS_CODE;
use fleetguard::shared::{ManualClock, SharedClock};
use serde_json::Value;
use tower::ServiceExt;

const SECRET: &str = "fleet-shared-secret";
const START: u64 = 1_700_000_000;

fn agent(threshold: u32, clock: &ManualClock) -> (Router, AgentState) {
    let mut config = FleetConfig::default();
    config.agent.shared_secret = SECRET.to_string();
    config.agent.node_name = "node-01".to_string();
    config.security.failure_threshold = threshold;
    config.security.ban_duration = 60;

    let shared: SharedClock = Arc::new(clock.clone());
    let state = AgentState::from_config(&config, shared).unwrap();
    (router(state.clone()), state)
}

fn get(path: &str, ip: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(path)
        .header("x-forwarded-for", ip);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn drop_status() -> StatusCode {
    StatusCode::from_u16(DROP_STATUS_CODE).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_valid_key_reaches_handler() {
    let clock = ManualClock::new(START);
    let (app, _) = agent(3, &clock);

    let response = app
        .oneshot(get("/api/node", "10.0.0.1", Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["node"]["name"], "node-01");
    assert_eq!(json["caller"], "fleet-peer");
}

#[tokio::test]
async fn test_wrong_and_missing_key_are_dropped_identically() {
    let clock = ManualClock::new(START);
    let (app, _) = agent(10, &clock);

    let wrong = app
        .clone()
        .oneshot(get("/api/node", "10.0.0.2", Some("nope")))
        .await
        .unwrap();
    let missing = app
        .oneshot(get("/api/node", "10.0.0.3", None))
        .await
        .unwrap();

    assert_eq!(wrong.status(), drop_status());
    assert_eq!(missing.status(), drop_status());
    assert_eq!(wrong.headers(), missing.headers());
    assert!(body_bytes(wrong).await.is_empty());
    assert!(body_bytes(missing).await.is_empty());
}

#[tokio::test]
async fn test_ban_after_threshold_blocks_valid_key() {
    let clock = ManualClock::new(START);
    let (app, state) = agent(3, &clock);
    let ip = "203.0.113.7";

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(get("/api/node", ip, Some("guess")))
            .await
            .unwrap();
        assert_eq!(response.status(), drop_status());
    }
    assert!(state.gate.reputation().is_banned(ip).await);

    // Correct key from a banned address is still dropped
    let response = app
        .clone()
        .oneshot(get("/api/node", ip, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), drop_status());

    // Other addresses are unaffected
    let response = app
        .clone()
        .oneshot(get("/api/node", "203.0.113.8", Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Ban lapses
    clock.advance(61);
    let response = app
        .oneshot(get("/api/node", ip, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_valid_key_clears_failure_count() {
    let clock = ManualClock::new(START);
    let (app, state) = agent(3, &clock);
    let ip = "203.0.113.20";

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(get("/api/node", ip, Some("guess")))
            .await
            .unwrap();
        assert_eq!(response.status(), drop_status());
    }

    let response = app
        .clone()
        .oneshot(get("/api/node", ip, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.gate.reputation().record(ip).await.is_none());

    // One more failure starts a fresh count instead of completing the old one
    let response = app
        .oneshot(get("/api/node", ip, Some("guess")))
        .await
        .unwrap();
    assert_eq!(response.status(), drop_status());
    assert!(!state.gate.reputation().is_banned(ip).await);
    assert_eq!(
        state
            .gate
            .reputation()
            .record(ip)
            .await
            .map(|r| r.failed_attempts),
        Some(1)
    );
}

#[tokio::test]
async fn test_health_bypasses_gate() {
    let clock = ManualClock::new(START);
    let (app, state) = agent(1, &clock);
    let ip = "198.51.100.1";

    state.gate.reputation().record_failure(ip).await;
    assert!(state.gate.reputation().is_banned(ip).await);

    let response = app.oneshot(get("/health", ip, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_unknown_path_requires_key() {
    let clock = ManualClock::new(START);
    let (app, state) = agent(5, &clock);

    let response = app
        .clone()
        .oneshot(get("/api/does-not-exist", "10.1.1.1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), drop_status());
    assert_eq!(
        state
            .gate
            .reputation()
            .record("10.1.1.1")
            .await
            .map(|r| r.failed_attempts),
        Some(1)
    );

    let response = app
        .oneshot(get("/api/does-not-exist", "10.1.1.2", Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_management_unban() {
    let clock = ManualClock::new(START);
    let (app, state) = agent(1, &clock);
    let banned = "192.0.2.44";

    state.gate.reputation().record_failure(banned).await;

    let response = app
        .clone()
        .oneshot(get("/api/security/bans", "10.9.9.9", Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["bans"][0]["ip"], banned);
    assert_eq!(json["bans"][0]["source"], "memory");
    assert_eq!(json["bans"][0]["remaining_secs"], 60);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/security/bans/{banned}"))
        .header("x-forwarded-for", "10.9.9.9")
        .header("x-api-key", SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["removed"], 1);

    assert!(!state.gate.reputation().is_banned(banned).await);
    assert!(state.gate.reputation().record(banned).await.is_none());

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/security/bans/not-an-ip")
        .header("x-forwarded-for", "10.9.9.9")
        .header("x-api-key", SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
