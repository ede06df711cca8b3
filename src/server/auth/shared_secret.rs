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

//! Machine-to-machine shared secret verification.
//!
//! The agent accepts requests carrying the fleet's shared secret in the
//! `x-api-key` header. Both the configured and the presented secret are
//! reduced to SHA-256 digests and compared in constant time, so neither the
//! content nor the length of the configured secret leaks through timing.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::provider::CredentialVerifier;
use crate::shared::auth_types::{CredentialScheme, Identity, RequestContext};
use crate::shared::error::AuthFailure;

/// Header carrying the machine credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Subject assigned to callers authenticated by the shared secret.
pub const FLEET_PEER: &str = "fleet-peer";

/// Verifier for the shared-secret scheme.
pub struct SharedSecretVerifier {
    digest: Zeroizing<[u8; 32]>,
}

impl SharedSecretVerifier {
    /// Create a verifier for `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("Shared secret cannot be empty");
        }
        Ok(Self {
            digest: digest(secret.as_bytes()),
        })
    }

    /// Constant-time comparison against the configured secret.
    pub fn matches(&self, presented: &str) -> bool {
        let presented = digest(presented.as_bytes());
        presented.as_slice().ct_eq(self.digest.as_slice()).into()
    }
}

fn digest(data: &[u8]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(Sha256::digest(data).into())
}

#[async_trait]
impl CredentialVerifier for SharedSecretVerifier {
    async fn verify(&self, ctx: &RequestContext) -> Result<Identity, AuthFailure> {
        // A missing key is compared like an empty one and reported the same
        // as a wrong one.
        let presented = ctx.header(API_KEY_HEADER).unwrap_or_default();
        if self.matches(presented) {
            Ok(Identity::new(FLEET_PEER, CredentialScheme::SharedSecret))
        } else {
            tracing::debug!(ip = %ctx.ip, "Shared secret rejected");
            Err(AuthFailure::InvalidCredential)
        }
    }

    fn scheme(&self) -> CredentialScheme {
        CredentialScheme::SharedSecret
    }
}

impl std::fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretVerifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use std::time::Instant;

    fn ctx(key: Option<&'static str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert(API_KEY_HEADER, HeaderValue::from_static(key));
        }
        RequestContext::new("10.0.0.1", headers)
    }

    #[tokio::test]
    async fn test_correct_secret_accepted() {
        let verifier = SharedSecretVerifier::new("s3cret-fleet-key").unwrap();
        let identity = verifier.verify(&ctx(Some("s3cret-fleet-key"))).await.unwrap();
        assert_eq!(identity.subject, FLEET_PEER);
        assert_eq!(identity.scheme, CredentialScheme::SharedSecret);
        assert!(identity.expires_at.is_none());
        assert_eq!(verifier.scheme(), identity.scheme);
    }

    #[tokio::test]
    async fn test_missing_and_wrong_are_indistinguishable() {
        let verifier = SharedSecretVerifier::new("s3cret-fleet-key").unwrap();
        let missing = verifier.verify(&ctx(None)).await.unwrap_err();
        let wrong = verifier.verify(&ctx(Some("s3cret-fleet-kez"))).await.unwrap_err();
        let empty = verifier.verify(&ctx(Some(""))).await.unwrap_err();
        assert_eq!(missing, AuthFailure::InvalidCredential);
        assert_eq!(wrong, missing);
        assert_eq!(empty, missing);
    }

    #[test]
    fn test_prefix_does_not_match() {
        let verifier = SharedSecretVerifier::new("s3cret-fleet-key").unwrap();
        assert!(!verifier.matches("s3cret"));
        assert!(!verifier.matches("s3cret-fleet-key-and-more"));
        assert!(verifier.matches("s3cret-fleet-key"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SharedSecretVerifier::new("").is_err());
    }

    fn median(samples: &mut [u128]) -> u128 {
        samples.sort_unstable();
        samples[samples.len() / 2]
    }

    #[test]
    fn test_comparison_timing_is_uniform() {
        const BATCH: usize = 256;
        const WARMUP: usize = 20;
        const SAMPLES: usize = 301;

        let verifier = SharedSecretVerifier::new("0123456789abcdef0123456789abcdef").unwrap();
        // Correct, first byte wrong, last byte wrong, and a missing header.
        let candidates = [
            "0123456789abcdef0123456789abcdef",
            "X123456789abcdef0123456789abcdef",
            "0123456789abcdef0123456789abcdeX",
            "",
        ];

        let mut timings = vec![Vec::with_capacity(SAMPLES); candidates.len()];
        for round in 0..WARMUP + SAMPLES {
            // Rotate the order so no candidate always runs first.
            for k in 0..candidates.len() {
                let i = (round + k) % candidates.len();
                let start = Instant::now();
                for _ in 0..BATCH {
                    std::hint::black_box(verifier.matches(std::hint::black_box(candidates[i])));
                }
                if round >= WARMUP {
                    timings[i].push(start.elapsed().as_nanos());
                }
            }
        }

        let medians: Vec<u128> = timings.iter_mut().map(|t| median(t)).collect();
        let fastest = medians.iter().copied().min().unwrap().max(1);
        let slowest = medians.iter().copied().max().unwrap();
        assert!(
            (slowest as f64) <= (fastest as f64) * 1.5,
            "median batch timings diverge: {medians:?}"
        );
    }
}
