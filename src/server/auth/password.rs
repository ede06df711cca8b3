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

//! Password login and session verification for the panel.
//!
//! This module provides the [`PasswordSessionVerifier`] which exchanges the
//! administrator password for a signed session token and then verifies that
//! token on every later request.
//!
//! # Security Features
//!
//! - **Argon2id hashing**: the configured password may be a PHC hash string
//! - **Constant-time comparison**: plaintext secrets are compared by digest
//! - **Timing normalization**: every login takes at least a minimum duration
//! - **Memory cleanup**: presented passwords are held in `zeroize` buffers
//! - **Ban opacity**: a banned client's login still performs the comparison
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fleetguard::server::auth::{PasswordSessionVerifier, TokenService};
//! use fleetguard::server::security::{DurableBans, ReputationConfig, ReputationStore};
//! use fleetguard::shared::system_clock;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let tokens = TokenService::new(b"signing-secret", Duration::from_secs(3600), system_clock())?;
//! let verifier = PasswordSessionVerifier::new(
//!     "admin",
//!     "correct horse battery staple",
//!     tokens,
//!     ReputationStore::new(ReputationConfig::default()),
//!     DurableBans::disabled(),
//! )?;
//!
//! let grant = verifier.login("203.0.113.5", Some("correct horse battery staple")).await;
//! assert!(grant.is_ok());
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::provider::CredentialVerifier;
use super::token::{SessionClaims, TokenService};
use crate::server::security::{DurableBans, ReputationStore};
use crate::shared::auth_types::{CredentialScheme, Identity, RequestContext};
use crate::shared::error::AuthFailure;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "fleetguard_session";

/// Default minimum wall time of a login attempt.
pub const DEFAULT_MIN_LOGIN_DURATION: Duration = Duration::from_millis(100);

/// How the administrator password is stored in memory.
enum StoredSecret {
    /// Argon2 PHC string.
    Hash(String),
    /// SHA-256 digest of a plaintext secret.
    Digest(Zeroizing<[u8; 32]>),
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    /// Encoded session token.
    pub token: String,
    /// Claims carried by the token.
    pub claims: SessionClaims,
}

/// Verifier for the password + session token scheme.
pub struct PasswordSessionVerifier {
    admin_user: String,
    secret: StoredSecret,
    tokens: TokenService,
    reputation: ReputationStore,
    durable: DurableBans,
    min_login_duration: Duration,
}

impl PasswordSessionVerifier {
    /// Create a new verifier.
    ///
    /// `password` is treated as an Argon2 hash when it starts with
    /// `$argon2`, and as a plaintext secret otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is empty or the hash cannot be parsed.
    pub fn new(
        admin_user: impl Into<String>,
        password: &str,
        tokens: TokenService,
        reputation: ReputationStore,
        durable: DurableBans,
    ) -> Result<Self> {
        if password.is_empty() {
            anyhow::bail!("Panel password cannot be empty");
        }

        let secret = if password.starts_with("$argon2") {
            PasswordHash::new(password)
                .map_err(|e| anyhow::anyhow!("Invalid Argon2 hash format: {}", e))?;
            StoredSecret::Hash(password.to_string())
        } else {
            StoredSecret::Digest(digest(password.as_bytes()))
        };

        Ok(Self {
            admin_user: admin_user.into(),
            secret,
            tokens,
            reputation,
            durable,
            min_login_duration: DEFAULT_MIN_LOGIN_DURATION,
        })
    }

    /// Set the minimum wall time of a login attempt.
    pub fn with_min_login_duration(mut self, duration: Duration) -> Self {
        self.min_login_duration = duration;
        self
    }

    /// Administrator subject name.
    pub fn admin_user(&self) -> &str {
        &self.admin_user
    }

    /// Token service used for sessions.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Exchange a password for a session token.
    ///
    /// The ban check consults the in-memory store and the durable store.
    /// The password comparison runs whether or not the client is banned, and
    /// the whole attempt takes at least the configured minimum duration, so
    /// the outcome cannot be told apart by timing.
    ///
    /// # Returns
    ///
    /// - `Err(AuthFailure::BannedIp)` if the address is banned
    /// - `Err(AuthFailure::MissingCredential)` if no password was supplied
    /// - `Err(AuthFailure::InvalidCredential)` if the password is wrong
    /// - `Ok(LoginGrant)` otherwise; reputation for `ip` is cleared
    pub async fn login(&self, ip: &str, password: Option<&str>) -> Result<LoginGrant, AuthFailure> {
        let start = Instant::now();

        let result = self.login_internal(ip, password).await;

        // Normalize timing by sleeping if we finished early
        let elapsed = start.elapsed();
        if elapsed < self.min_login_duration {
            tokio::time::sleep(self.min_login_duration - elapsed).await;
        }

        result
    }

    async fn login_internal(
        &self,
        ip: &str,
        password: Option<&str>,
    ) -> Result<LoginGrant, AuthFailure> {
        let banned = self.reputation.is_banned(ip).await || self.durable.is_banned(ip).await;

        let presented = password.filter(|p| !p.is_empty());
        let candidate = Zeroizing::new(presented.unwrap_or_default().to_string());
        let matched = self.check_password(&candidate);

        if banned {
            tracing::debug!(ip = %ip, "Login attempt from banned address");
            return Err(AuthFailure::BannedIp);
        }
        if presented.is_none() {
            return Err(AuthFailure::MissingCredential);
        }
        if !matched {
            tracing::debug!(ip = %ip, "Login failed: incorrect password");
            return Err(AuthFailure::InvalidCredential);
        }

        self.complete_login(ip).await;

        let token = self.tokens.create(&self.admin_user, ip);
        let claims = self
            .tokens
            .verify(&token)
            .map_err(|_| AuthFailure::MalformedToken)?;

        tracing::info!(ip = %ip, user = %self.admin_user, "Login successful");
        Ok(LoginGrant { token, claims })
    }

    /// Clear reputation after a successful login.
    ///
    /// Resets the in-memory record and removes the durable row.
    pub async fn complete_login(&self, ip: &str) {
        self.reputation.record_success(ip).await;
        self.durable.clear(ip).await;
    }

    /// Compare a presented password against the configured one.
    fn check_password(&self, candidate: &Zeroizing<String>) -> bool {
        match &self.secret {
            StoredSecret::Digest(expected) => {
                let presented = digest(candidate.as_bytes());
                presented.as_slice().ct_eq(expected.as_slice()).into()
            }
            StoredSecret::Hash(hash) => match verify_password_hash(candidate, hash) {
                Ok(verified) => verified,
                Err(e) => {
                    tracing::warn!(error = %e, "Argon2 verification error");
                    false
                }
            },
        }
    }
}

#[async_trait]
impl CredentialVerifier for PasswordSessionVerifier {
    async fn verify(&self, ctx: &RequestContext) -> Result<Identity, AuthFailure> {
        let token = ctx
            .cookie(SESSION_COOKIE)
            .or_else(|| ctx.bearer_token())
            .ok_or(AuthFailure::MissingCredential)?;

        let claims = self.tokens.verify(token)?;
        Ok(Identity::new(claims.sub, CredentialScheme::PasswordSession).with_expiry(claims.exp))
    }

    fn scheme(&self) -> CredentialScheme {
        CredentialScheme::PasswordSession
    }
}

impl std::fmt::Debug for PasswordSessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordSessionVerifier")
            .field("admin_user", &self.admin_user)
            .field("min_login_duration", &self.min_login_duration)
            .finish_non_exhaustive()
    }
}

fn digest(data: &[u8]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(Sha256::digest(data).into())
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str, max_age: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        max_age.as_secs()
    )
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0")
}

/// Generate an Argon2id password hash.
///
/// # Example
///
/// ```no_run
/// use fleetguard::server::auth::password::hash_password;
///
/// let hash = hash_password("my_secure_password").unwrap();
/// println!("Hash: {}", hash);
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    use argon2::password_hash::SaltString;

    let salt = SaltString::generate(&mut OsRng);

    // m=19456 KiB, t=2, p=1
    let params = Params::new(19456, 2, 1, None)
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

/// Verify a password against an Argon2 hash.
///
/// # Returns
///
/// `true` if the password matches, `false` otherwise.
pub fn verify_password_hash(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid hash format: {}", e))?;

    let argon2 = Argon2::default();

    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Verification error: {}", e)),
    }
}
