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

//! Per-IP reputation store with ban support.
//!
//! This module provides fail2ban-like bookkeeping for the HTTP perimeter. It
//! counts failed credential submissions per client address and bans an
//! address once the count reaches the configured threshold.
//!
//! The failure counter is a ratchet: a ban window running out does not reset
//! it. Only [`ReputationStore::record_success`] or a manual
//! [`ReputationStore::unban`] returns an address to a clean slate, so an
//! address that was banned once is banned again by its next failure.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::shared::clock::{system_clock, SharedClock};

/// Configuration for the reputation store.
///
/// - `threshold`: failures that trigger a ban
/// - `ban_duration`: how long a ban lasts, also the idle time after which an
///   unbanned record is evicted
/// - `cleanup_interval`: minimum spacing between eviction sweeps
/// - `whitelist`: addresses that are never tracked or banned
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    /// Failed attempts before ban.
    pub threshold: u32,
    /// Ban duration.
    pub ban_duration: Duration,
    /// Minimum time between cleanup sweeps.
    pub cleanup_interval: Duration,
    /// Addresses exempt from tracking.
    pub whitelist: Vec<IpAddr>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            ban_duration: Duration::from_secs(3600),  // 1 hour
            cleanup_interval: Duration::from_secs(300), // 5 minutes
            whitelist: vec![],
        }
    }
}

impl ReputationConfig {
    /// Create a configuration with the given threshold and ban length.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Failed attempts before ban
    /// * `ban_duration_secs` - Ban duration in seconds
    pub fn new(threshold: u32, ban_duration_secs: u64) -> Self {
        Self {
            threshold,
            ban_duration: Duration::from_secs(ban_duration_secs),
            ..Self::default()
        }
    }

    /// Set the cleanup throttle interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the whitelist.
    pub fn with_whitelist(mut self, whitelist: Vec<IpAddr>) -> Self {
        self.whitelist = whitelist;
        self
    }
}

/// Reputation of a single client address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpRecord {
    /// Client address as resolved by the gate.
    pub ip: String,
    /// Failures since the last success or manual unban.
    pub failed_attempts: u32,
    /// Time of the most recent failure (Unix seconds).
    pub last_attempt: u64,
    /// End of the ban window (Unix seconds), 0 when never banned.
    pub banned_until: u64,
}

impl IpRecord {
    fn new(ip: &str, now: u64) -> Self {
        Self {
            ip: ip.to_string(),
            failed_attempts: 0,
            last_attempt: now,
            banned_until: 0,
        }
    }

    /// Whether the ban window is open at `now`.
    pub fn is_banned(&self, now: u64) -> bool {
        self.banned_until > now
    }

    /// Seconds left in the ban window at `now`.
    pub fn remaining(&self, now: u64) -> u64 {
        self.banned_until.saturating_sub(now)
    }
}

/// Per-IP failure and ban bookkeeping.
///
/// # Thread Safety
///
/// Every mutation goes through the write half of a single `RwLock`, so
/// concurrent failures for the same address are never lost. Ban checks only
/// take the read half. The store never performs I/O while holding the lock.
///
/// Cloning is cheap and shares state.
#[derive(Debug)]
pub struct ReputationStore {
    records: Arc<RwLock<HashMap<String, IpRecord>>>,
    /// Unix second of the last cleanup sweep.
    last_cleanup: Arc<AtomicU64>,
    config: ReputationConfig,
    clock: SharedClock,
}

impl ReputationStore {
    /// Create a store on the system clock.
    pub fn new(config: ReputationConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a store on an explicit clock.
    pub fn with_clock(config: ReputationConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            last_cleanup: Arc::new(AtomicU64::new(now)),
            config,
            clock,
        }
    }

    /// Check if an address is currently banned.
    ///
    /// Whitelisted addresses always return `false`.
    pub async fn is_banned(&self, ip: &str) -> bool {
        if self.is_whitelisted(ip) {
            return false;
        }

        let now = self.clock.now();
        let records = self.records.read().await;
        records.get(ip).is_some_and(|r| r.is_banned(now))
    }

    /// Record a failed credential submission.
    ///
    /// Increments the failure count and, once the count reaches the
    /// threshold, (re)opens the ban window from now.
    ///
    /// # Returns
    ///
    /// Returns `true` if the address is banned after this failure.
    pub async fn record_failure(&self, ip: &str) -> bool {
        if self.is_whitelisted(ip) {
            return false;
        }

        let now = self.clock.now();
        let ban_secs = self.config.ban_duration.as_secs();

        let (attempts, newly_banned, banned) = {
            let mut records = self.records.write().await;
            let record = records
                .entry(ip.to_string())
                .or_insert_with(|| IpRecord::new(ip, now));

            record.failed_attempts = record.failed_attempts.saturating_add(1);
            record.last_attempt = now;

            if record.failed_attempts >= self.config.threshold {
                let was_banned = record.is_banned(now);
                record.banned_until = now.saturating_add(ban_secs);
                (record.failed_attempts, !was_banned, true)
            } else {
                (record.failed_attempts, false, false)
            }
        };

        if newly_banned {
            tracing::warn!(
                ip = %ip,
                attempts = attempts,
                duration_secs = ban_secs,
                "Banning IP due to too many failed authentication attempts"
            );
        } else {
            tracing::debug!(ip = %ip, attempts = attempts, "Recorded authentication failure");
        }

        banned
    }

    /// Record a successful authentication.
    ///
    /// Resets both the failure count and the ban window. Untracked
    /// addresses only take the read lock.
    ///
    /// # Returns
    ///
    /// Returns `true` if a record was cleared.
    pub async fn record_success(&self, ip: &str) -> bool {
        let tracked = self.records.read().await.contains_key(ip);
        if !tracked {
            return false;
        }

        let removed = self.records.write().await.remove(ip);
        if let Some(record) = &removed {
            tracing::debug!(
                ip = %ip,
                attempts = record.failed_attempts,
                "Cleared failure record after successful authentication"
            );
        }
        removed.is_some()
    }

    /// Manually unban an address.
    ///
    /// Clears the ban window and the failure count, so the address starts
    /// over from a clean slate.
    ///
    /// # Returns
    ///
    /// Returns `true` if the address had a record.
    pub async fn unban(&self, ip: &str) -> bool {
        let removed = self.records.write().await.remove(ip);
        match removed {
            Some(record) => {
                tracing::info!(
                    ip = %ip,
                    attempts = record.failed_attempts,
                    "Manually unbanned IP"
                );
                true
            }
            None => false,
        }
    }

    /// Manually unban every address.
    ///
    /// # Returns
    ///
    /// Returns the number of records cleared.
    pub async fn unban_all(&self) -> usize {
        let cleared = {
            let mut records = self.records.write().await;
            let count = records.len();
            records.clear();
            count
        };
        tracing::info!(cleared = cleared, "Manually unbanned all IPs");
        cleared
    }

    /// Seed a record from durable state.
    ///
    /// Used at startup so bans that outlived a restart are enforced by the
    /// in-memory gate as well. Existing values are only ever raised.
    pub async fn restore(&self, ip: &str, attempts: u32, last_attempt: u64, banned_until: u64) {
        if self.is_whitelisted(ip) {
            return;
        }

        let mut records = self.records.write().await;
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| IpRecord::new(ip, last_attempt));
        record.failed_attempts = record.failed_attempts.max(attempts);
        record.last_attempt = record.last_attempt.max(last_attempt);
        record.banned_until = record.banned_until.max(banned_until);
    }

    /// Evict records that are unbanned and idle.
    ///
    /// Runs at most once per `cleanup_interval`; calls in between return
    /// immediately without touching the map. An unbanned record is evicted
    /// once it has been idle for longer than the ban duration, which keeps
    /// memory bounded to recent offenders.
    ///
    /// # Returns
    ///
    /// `None` if the sweep was skipped, otherwise the number of evictions.
    pub async fn cleanup(&self) -> Option<usize> {
        let now = self.clock.now();
        let last = self.last_cleanup.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.config.cleanup_interval.as_secs() {
            return None;
        }
        // Only one caller wins the sweep for this interval.
        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        Some(self.evict_idle(now).await)
    }

    async fn evict_idle(&self, now: u64) -> usize {
        let idle = self.config.ban_duration.as_secs();
        let (removed, remaining) = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, r| r.is_banned(now) || now.saturating_sub(r.last_attempt) <= idle);
            (before - records.len(), records.len())
        };

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining = remaining,
                "Cleaned up idle reputation records"
            );
        }
        removed
    }

    /// Snapshot of one address's record.
    pub async fn record(&self, ip: &str) -> Option<IpRecord> {
        self.records.read().await.get(ip).cloned()
    }

    /// Currently banned addresses with the seconds left in their window.
    pub async fn banned(&self) -> Vec<(String, u64)> {
        let now = self.clock.now();
        let records = self.records.read().await;
        let mut bans: Vec<(String, u64)> = records
            .values()
            .filter(|r| r.is_banned(now))
            .map(|r| (r.ip.clone(), r.remaining(now)))
            .collect();
        bans.sort();
        bans
    }

    /// Number of currently banned addresses.
    pub async fn banned_count(&self) -> usize {
        let now = self.clock.now();
        let records = self.records.read().await;
        records.values().filter(|r| r.is_banned(now)).count()
    }

    /// Number of tracked addresses.
    pub async fn tracked_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Check if an address is whitelisted.
    pub fn is_whitelisted(&self, ip: &str) -> bool {
        if self.config.whitelist.is_empty() {
            return false;
        }
        ip.parse::<IpAddr>()
            .is_ok_and(|addr| self.config.whitelist.contains(&addr))
    }
}

impl Clone for ReputationStore {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            last_cleanup: Arc::clone(&self.last_cleanup),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}
