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

//! HTTP servers for the fleetguard agent and panel.
//!
//! # Overview
//!
//! The server module consists of:
//!
//! - [`gate`]: the connection gate middleware shared by both processes
//! - [`agent`]: node agent routes (shared secret scheme)
//! - [`panel`]: panel routes (password + session scheme)
//! - [`management`]: ban management endpoints mounted by both
//! - [`auth`]: credential verifiers and session tokens
//! - [`security`]: IP reputation and the durable ban mirror
//! - [`config`]: YAML configuration
//!
//! # Example
//!
//! ```no_run
//! use fleetguard::server::{agent, config, serve};
//! use fleetguard::shared::system_clock;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config(None, config::Role::Agent)?;
//!     let state = agent::AgentState::from_config(&config, system_clock())?;
//!     serve(agent::router(state), &config.server, std::future::pending()).await
//! }
//! ```

pub mod agent;
pub mod auth;
pub mod config;
pub mod extract;
pub mod gate;
pub mod management;
pub mod panel;
pub mod response;
pub mod security;

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;

use self::config::ServerSettings;

pub use self::gate::{ConnectionGate, GateDecision, GatePolicy};
pub use self::response::{drop_response, ApiError};

/// Listen on the configured address and serve `router` until `shutdown`
/// resolves.
///
/// The transport peer address is recorded for every connection so the gate
/// can fall back to it when no forwarding header is present.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve<F>(router: Router, settings: &ServerSettings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", settings.bind_address, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(address = %addr, "Listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
