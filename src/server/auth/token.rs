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

//! Stateless session tokens.
//!
//! A token is `hex(claims).hex(hmac)` where the claims are JSON
//! and the tag is HMAC-SHA256 over the encoded claims. Nothing is stored
//! server-side: a token stays valid until its expiry, and logging out only
//! deletes the client's copy. There is no revocation list.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::shared::clock::SharedClock;
use crate::shared::error::AuthFailure;

type HmacSha256 = Hmac<Sha256>;

/// Default session validity (24 hours).
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(1440 * 60);

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject the session was issued to.
    pub sub: String,
    /// Client address at login time.
    pub ip: String,
    /// Issued at (Unix seconds).
    pub iat: u64,
    /// Expires at (Unix seconds).
    pub exp: u64,
}

/// Issues and verifies signed session tokens.
#[derive(Clone)]
pub struct TokenService {
    /// Keyed MAC, cloned per operation.
    mac: HmacSha256,
    validity: Duration,
    clock: SharedClock,
}

impl TokenService {
    /// Create a service signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty.
    pub fn new(secret: &[u8], validity: Duration, clock: SharedClock) -> Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("Signing secret cannot be empty");
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("Invalid signing secret: {}", e))?;
        Ok(Self {
            mac,
            validity,
            clock,
        })
    }

    /// Create a service with a random per-process secret.
    ///
    /// Sessions issued by such a service do not survive a restart.
    pub fn with_random_secret(validity: Duration, clock: SharedClock) -> Result<Self> {
        let mut secret = zeroize::Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(secret.as_mut());
        Self::new(secret.as_ref(), validity, clock)
    }

    /// Configured validity window.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issue a token for `subject` logging in from `ip`.
    pub fn create(&self, subject: &str, ip: &str) -> String {
        let iat = self.clock.now();
        let claims = SessionClaims {
            sub: subject.to_string(),
            ip: ip.to_string(),
            iat,
            exp: iat.saturating_add(self.validity.as_secs()),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &SessionClaims) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let payload = hex::encode(json);
        let tag = self.sign(payload.as_bytes());
        format!("{payload}.{}", hex::encode(tag))
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verify a token and return its claims.
    ///
    /// The signature is checked before any claim is looked at. A token is
    /// expired once the current time is strictly past `exp`.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthFailure> {
        let (payload, tag) = token
            .trim()
            .split_once('.')
            .ok_or(AuthFailure::MalformedToken)?;
        if payload.is_empty() || tag.contains('.') {
            return Err(AuthFailure::MalformedToken);
        }

        let tag = hex::decode(tag).map_err(|_| AuthFailure::MalformedToken)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| AuthFailure::InvalidSignature)?;

        let json = hex::decode(payload).map_err(|_| AuthFailure::MalformedToken)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| AuthFailure::MalformedToken)?;

        if self.clock.now() > claims.exp {
            return Err(AuthFailure::ExpiredToken);
        }
        Ok(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;
    use std::sync::Arc;

    fn service(clock: &ManualClock) -> TokenService {
        TokenService::new(
            b"test-signing-secret",
            Duration::from_secs(600),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let clock = ManualClock::new(1_000);
        let tokens = service(&clock);

        let token = tokens.create("admin", "203.0.113.5");
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.ip, "203.0.113.5");
        assert_eq!(claims.iat, 1_000);
        assert_eq!(claims.exp, 1_600);
    }

    #[test]
    fn test_expiry_boundary() {
        let clock = ManualClock::new(1_000);
        let tokens = service(&clock);
        let token = tokens.create("admin", "203.0.113.5");

        clock.set(1_600);
        assert!(tokens.verify(&token).is_ok());

        clock.set(1_601);
        assert_eq!(tokens.verify(&token), Err(AuthFailure::ExpiredToken));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let clock = ManualClock::new(1_000);
        let tokens = service(&clock);
        let token = tokens.create("admin", "203.0.113.5");

        let (_, tag) = token.split_once('.').unwrap();
        let forged = SessionClaims {
            sub: "root".into(),
            ip: "203.0.113.5".into(),
            iat: 1_000,
            exp: u64::MAX,
        };
        let payload = hex::encode(serde_json::to_vec(&forged).unwrap());
        assert_eq!(
            tokens.verify(&format!("{payload}.{tag}")),
            Err(AuthFailure::InvalidSignature)
        );
    }

    #[test]
    fn test_other_key_rejected() {
        let clock = ManualClock::new(1_000);
        let token = service(&clock).create("admin", "203.0.113.5");
        let other =
            TokenService::new(b"another-secret", Duration::from_secs(600), Arc::new(clock)).unwrap();
        assert_eq!(other.verify(&token), Err(AuthFailure::InvalidSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let clock = ManualClock::new(1_000);
        let tokens = service(&clock);

        for bad in ["", "abc", ".abc", "a.b.c", "abc.!!!"] {
            assert_eq!(tokens.verify(bad), Err(AuthFailure::MalformedToken), "{bad:?}");
        }
    }

    #[test]
    fn test_signed_garbage_is_malformed() {
        let clock = ManualClock::new(1_000);
        let tokens = service(&clock);

        let payload = hex::encode(b"{\"not\":\"claims\"}");
        let tag = hex::encode(tokens.sign(payload.as_bytes()));
        assert_eq!(
            tokens.verify(&format!("{payload}.{tag}")),
            Err(AuthFailure::MalformedToken)
        );
    }

    #[test]
    fn test_random_secret_services_are_independent() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let a = TokenService::with_random_secret(DEFAULT_TOKEN_VALIDITY, Arc::clone(&clock)).unwrap();
        let b = TokenService::with_random_secret(DEFAULT_TOKEN_VALIDITY, clock).unwrap();

        let token = a.create("admin", "10.0.0.1");
        assert!(a.verify(&token).is_ok());
        assert_eq!(b.verify(&token), Err(AuthFailure::InvalidSignature));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        assert!(TokenService::new(b"", DEFAULT_TOKEN_VALIDITY, clock).is_err());
    }
}
