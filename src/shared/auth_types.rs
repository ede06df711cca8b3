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

//! Shared authentication types.
//!
//! # Types
//!
//! - [`Identity`]: who a verified request belongs to
//! - [`CredentialScheme`]: which of the two credential schemes produced it
//! - [`RequestContext`]: the parts of a request a verifier may look at

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use serde::Serialize;

/// The credential scheme a process authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialScheme {
    /// Machine-to-machine shared secret in a request header.
    SharedSecret,
    /// Human password exchanged for a signed session token.
    PasswordSession,
}

/// An authenticated principal.
///
/// # Examples
///
/// ```
/// use fleetguard::shared::auth_types::{CredentialScheme, Identity};
///
/// let id = Identity::new("admin", CredentialScheme::PasswordSession);
/// assert_eq!(id.subject, "admin");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Subject name (admin user, or the peer label for machine callers).
    pub subject: String,

    /// Scheme that authenticated the subject.
    pub scheme: CredentialScheme,

    /// Session expiry (Unix seconds) when the identity came from a token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Identity {
    /// Create an identity without an expiry.
    pub fn new(subject: impl Into<String>, scheme: CredentialScheme) -> Self {
        Self {
            subject: subject.into(),
            scheme,
            expires_at: None,
        }
    }

    /// Attach a session expiry.
    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// The request data a credential verifier is allowed to inspect.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Resolved client address.
    pub ip: String,

    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Build a context from a resolved address and the request headers.
    pub fn new(ip: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            ip: ip.into(),
            headers,
        }
    }

    /// Value of a header, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a named cookie across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Token from an `Authorization: Bearer ...` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }
}
