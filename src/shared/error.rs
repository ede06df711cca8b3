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

//! Shared error types for the agent and the panel.
//!
//! # Error Categories
//!
//! - [`AuthFailure`]: why a credential was not accepted
//! - [`MirrorError`]: the durable ban store could not be reached

use thiserror::Error;

/// Reason a request failed authentication.
///
/// These values never leave the process verbatim for perimeter failures:
/// the connection gate collapses them into a single drop response. They are
/// only rendered (via [`AuthFailure::public_message`]) for session failures
/// on already-authenticated routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AuthFailure {
    /// No credential was presented.
    #[error("credential missing")]
    MissingCredential,

    /// A credential was presented but did not match.
    #[error("credential invalid")]
    InvalidCredential,

    /// The client address is inside a ban window.
    #[error("client address banned")]
    BannedIp,

    /// Session token is past its expiry.
    #[error("session token expired")]
    ExpiredToken,

    /// Session token could not be decoded.
    #[error("session token malformed")]
    MalformedToken,

    /// Session token signature does not verify.
    #[error("session token signature invalid")]
    InvalidSignature,
}

impl AuthFailure {
    /// Whether this failure counts as a bad credential submission.
    ///
    /// `BannedIp` is excluded: a banned client retrying does not extend its
    /// own ban.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, AuthFailure::BannedIp)
    }

    /// Message shown to a client on a structured (non-drop) failure.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthFailure::ExpiredToken => "session expired",
            AuthFailure::MissingCredential => "authentication required",
            _ => "invalid session",
        }
    }
}

/// Durable ban store failure.
///
/// Callers treat every variant as "persistence unavailable" and continue on
/// the in-memory path.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The database rejected or failed a statement.
    #[error("ban store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// The blocking worker running the statement was lost.
    #[error("ban store worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_ip_is_not_an_attempt() {
        assert!(!AuthFailure::BannedIp.counts_as_attempt());
        assert!(AuthFailure::InvalidCredential.counts_as_attempt());
        assert!(AuthFailure::MissingCredential.counts_as_attempt());
        assert!(AuthFailure::ExpiredToken.counts_as_attempt());
    }

    #[test]
    fn test_public_messages_do_not_distinguish_token_faults() {
        assert_eq!(
            AuthFailure::MalformedToken.public_message(),
            AuthFailure::InvalidSignature.public_message()
        );
        assert_eq!(AuthFailure::ExpiredToken.public_message(), "session expired");
    }
}
