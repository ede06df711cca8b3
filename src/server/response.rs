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

//! Handler error type and the fixed drop response.
//!
//! Handlers never decide whether a failure is shown to the client. They
//! return an [`ApiError`]; its response carries the [`AuthFailure`] (or an
//! [`InternalFault`] marker) in the response extensions, and the connection
//! gate rewrites it according to the request path.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::shared::error::AuthFailure;

/// Non-standard status used for dropped requests.
pub const DROP_STATUS_CODE: u16 = 444;

/// Response extension marking a handler-side fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalFault;

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was understood but is invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything else. Never rendered to the client.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(failure) => {
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": failure.public_message() })),
                )
                    .into_response();
                response.extensions_mut().insert(failure);
                response
            }
            ApiError::NotFound(what) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
            }
            ApiError::BadRequest(why) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": why }))).into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Handler failed");
                let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
                response.extensions_mut().insert(InternalFault);
                response
            }
        }
    }
}

/// The drop response: status 444, empty body, no headers.
///
/// Every refused perimeter request gets exactly this response, whatever the
/// underlying reason.
pub fn drop_response() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() =
        StatusCode::from_u16(DROP_STATUS_CODE).unwrap_or(StatusCode::FORBIDDEN);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_auth_error_is_tagged() {
        let response = ApiError::Auth(AuthFailure::ExpiredToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.extensions().get::<AuthFailure>(),
            Some(&AuthFailure::ExpiredToken)
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "session expired");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = ApiError::Internal(anyhow::anyhow!("db path /var/secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<InternalFault>().is_some());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_drop_response_is_empty() {
        let response = drop_response();
        assert_eq!(response.status().as_u16(), 444);
        assert!(response.headers().is_empty());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
