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

//! Authenticated-request extractor.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use super::auth::CredentialVerifier;
use super::gate::{ClientIp, ConnectionGate};
use super::response::ApiError;
use crate::shared::auth_types::{CredentialScheme, Identity, RequestContext};

/// Extractor that runs the process's [`CredentialVerifier`].
///
/// A handler taking `Authenticated` only runs for verified requests; a
/// failure becomes an [`ApiError::Auth`] response for the gate to judge.
///
/// A verified shared secret is a credential submission that succeeded, so
/// the caller's failure record is cleared. Session checks leave reputation
/// alone; on the panel only a login clears it.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    Arc<dyn CredentialVerifier>: FromRef<S>,
    ConnectionGate: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<dyn CredentialVerifier>::from_ref(state);
        let ClientIp(ip) = ClientIp::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});

        let ctx = RequestContext::new(ip, parts.headers.clone());
        let identity = verifier.verify(&ctx).await?;

        if verifier.scheme() == CredentialScheme::SharedSecret {
            ConnectionGate::from_ref(state)
                .reputation()
                .record_success(&ctx.ip)
                .await;
        }
        Ok(Authenticated(identity))
    }
}
