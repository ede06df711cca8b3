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

//! Credential verifier trait.
//!
//! This module defines the [`CredentialVerifier`] trait that both credential
//! schemes implement. The connection gate never looks at a credential
//! itself; it only sees the [`AuthFailure`] a verifier produced.
//!
//! # Implementing CredentialVerifier
//!
//! ```
//! use async_trait::async_trait;
//! use fleetguard::server::auth::CredentialVerifier;
//! use fleetguard::shared::{AuthFailure, CredentialScheme, Identity, RequestContext};
//!
//! struct AllowLoopback;
//!
//! #[async_trait]
//! impl CredentialVerifier for AllowLoopback {
//!     async fn verify(&self, ctx: &RequestContext) -> Result<Identity, AuthFailure> {
//!         if ctx.ip == "127.0.0.1" {
//!             Ok(Identity::new("local", CredentialScheme::SharedSecret))
//!         } else {
//!             Err(AuthFailure::InvalidCredential)
//!         }
//!     }
//!
//!     fn scheme(&self) -> CredentialScheme {
//!         CredentialScheme::SharedSecret
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::shared::auth_types::{CredentialScheme, Identity, RequestContext};
use crate::shared::error::AuthFailure;

/// Trait for per-request credential verification.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request the process serves.
///
/// # Error Handling
///
/// Verification returns the typed [`AuthFailure`] rather than an opaque
/// error so the gate can decide between recording and passing through.
/// Verifiers must not touch reputation state themselves.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify the credential carried by a request.
    ///
    /// # Returns
    ///
    /// - `Ok(Identity)` if the credential is valid
    /// - `Err(AuthFailure)` describing why it is not
    async fn verify(&self, ctx: &RequestContext) -> Result<Identity, AuthFailure>;

    /// Scheme this verifier implements.
    fn scheme(&self) -> CredentialScheme;
}
