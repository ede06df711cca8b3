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

//! Credential verification for the agent and the panel.
//!
//! # Architecture
//!
//! Both processes authenticate through the [`CredentialVerifier`] trait:
//!
//! - **Shared secret**: via [`SharedSecretVerifier`] (agent, machine callers)
//! - **Password + session**: via [`PasswordSessionVerifier`] (panel, humans),
//!   with tokens issued by [`TokenService`]
//!
//! Verifiers report failures as typed [`AuthFailure`](crate::shared::AuthFailure)
//! values and never touch reputation state on the session path; recording
//! is the connection gate's job.
//!
//! # Usage
//!
//! ```
//! use fleetguard::server::auth::{CredentialVerifier, SharedSecretVerifier};
//! use fleetguard::shared::RequestContext;
//! use axum::http::{HeaderMap, HeaderValue};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let verifier = SharedSecretVerifier::new("fleet-key")?;
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-api-key", HeaderValue::from_static("fleet-key"));
//! let identity = verifier.verify(&RequestContext::new("10.0.0.1", headers)).await;
//! assert!(identity.is_ok());
//! # Ok(())
//! # }
//! ```

pub mod password;
pub mod provider;
pub mod shared_secret;
pub mod token;

pub use password::{
    expired_session_cookie, hash_password, session_cookie, verify_password_hash, LoginGrant,
    PasswordSessionVerifier, SESSION_COOKIE,
};
pub use provider::CredentialVerifier;
pub use shared_secret::{SharedSecretVerifier, API_KEY_HEADER};
pub use token::{SessionClaims, TokenService, DEFAULT_TOKEN_VALIDITY};
