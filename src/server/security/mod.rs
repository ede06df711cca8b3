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

//! IP reputation for the fleetguard perimeter.
//!
//! This module provides:
//!
//! - [`ReputationStore`]: in-memory failure counting with ban support (fail2ban-like)
//! - [`BanMirror`] / [`SqliteBanMirror`]: durable ban records for the panel
//! - [`DurableBans`]: failure-tolerant wrapper used by the gate and handlers
//! - [`resolve_client_ip`]: client address resolution
//!
//! ## Example
//!
//! ```
//! use fleetguard::server::security::{ReputationConfig, ReputationStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ReputationStore::new(ReputationConfig::new(3, 60));
//!     let ip = "192.168.1.100";
//!
//!     if store.is_banned(ip).await {
//!         return;
//!     }
//!
//!     // On a failed credential submission
//!     if store.record_failure(ip).await {
//!         println!("IP has been banned after too many failures");
//!     }
//!
//!     // On success
//!     store.record_success(ip).await;
//! }
//! ```

mod client_ip;
mod mirror;
mod reputation;

pub use client_ip::{resolve_client_ip, FORWARDED_FOR, REAL_IP, UNKNOWN_CLIENT};
pub use mirror::{BanMirror, DurableBans, DurableRecord, SqliteBanMirror};
pub use reputation::{IpRecord, ReputationConfig, ReputationStore};
