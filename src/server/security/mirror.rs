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

//! Durable ban records.
//!
//! The panel persists failed logins and bans so that a restart does not
//! hand attackers a fresh set of attempts. The durable records and the
//! in-memory [`ReputationStore`](super::ReputationStore) are updated
//! independently; a client is treated as banned if either of them says so.
//!
//! Persistence is advisory. Every failure of the backing store is logged and
//! the caller continues on the in-memory path alone ([`DurableBans`] does
//! this for all operations).

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::shared::clock::SharedClock;
use crate::shared::error::MirrorError;

/// A persisted ban/attempt row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurableRecord {
    /// Client address.
    pub ip: String,
    /// Failed attempts since the row was created.
    pub attempts: u32,
    /// Time of the latest failure (Unix seconds).
    pub last_attempt: u64,
    /// End of the ban window (Unix seconds), 0 when not banned.
    pub banned_until: u64,
}

/// Keyed store of per-address ban records that survives restarts.
#[async_trait]
pub trait BanMirror: Send + Sync {
    /// Whether the address is banned.
    ///
    /// A row whose ban window has elapsed is deleted as part of the check.
    async fn check_banned(&self, ip: &str) -> Result<bool, MirrorError>;

    /// Count a failure for the address.
    ///
    /// Returns `true` if this call crossed the ban threshold.
    async fn record_failure(&self, ip: &str) -> Result<bool, MirrorError>;

    /// Delete the address's row.
    async fn clear(&self, ip: &str) -> Result<(), MirrorError>;

    /// Delete every row, returning how many were removed.
    async fn clear_all(&self) -> Result<usize, MirrorError>;

    /// Delete rows whose ban window has elapsed.
    async fn sweep_expired(&self) -> Result<usize, MirrorError>;

    /// Rows whose ban window is still open.
    async fn active_bans(&self) -> Result<Vec<DurableRecord>, MirrorError>;
}

/// SQLite-backed [`BanMirror`].
///
/// Statements run on the blocking thread pool; the connection is guarded by
/// its own mutex, unrelated to the reputation store's lock.
pub struct SqliteBanMirror {
    conn: Arc<Mutex<Connection>>,
    threshold: u32,
    ban_duration: Duration,
    clock: SharedClock,
}

impl SqliteBanMirror {
    /// Open (or create) the ban table in a database file.
    pub fn open(
        path: impl AsRef<Path>,
        threshold: u32,
        ban_duration: Duration,
        clock: SharedClock,
    ) -> Result<Self, MirrorError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, threshold, ban_duration, clock)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(
        threshold: u32,
        ban_duration: Duration,
        clock: SharedClock,
    ) -> Result<Self, MirrorError> {
        Self::from_connection(Connection::open_in_memory()?, threshold, ban_duration, clock)
    }

    fn from_connection(
        conn: Connection,
        threshold: u32,
        ban_duration: Duration,
        clock: SharedClock,
    ) -> Result<Self, MirrorError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            threshold,
            ban_duration,
            clock,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MirrorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| MirrorError::Worker("connection mutex poisoned".to_string()))?;
            f(&mut guard).map_err(MirrorError::from)
        })
        .await
        .map_err(|e| MirrorError::Worker(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ip_bans (
            ip TEXT PRIMARY KEY,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt INTEGER NOT NULL,
            banned_until INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ip_bans_banned_until ON ip_bans(banned_until)",
        [],
    )?;
    Ok(())
}

fn to_sql(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl BanMirror for SqliteBanMirror {
    async fn check_banned(&self, ip: &str) -> Result<bool, MirrorError> {
        let ip = ip.to_string();
        let now = to_sql(self.clock.now());
        self.with_conn(move |conn| {
            let banned_until: Option<i64> = conn
                .query_row(
                    "SELECT banned_until FROM ip_bans WHERE ip = ?1",
                    params![ip],
                    |row| row.get(0),
                )
                .optional()?;

            match banned_until {
                Some(until) if until > now => Ok(true),
                Some(until) if until > 0 => {
                    conn.execute("DELETE FROM ip_bans WHERE ip = ?1", params![ip])?;
                    Ok(false)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn record_failure(&self, ip: &str) -> Result<bool, MirrorError> {
        let ip = ip.to_string();
        let now = to_sql(self.clock.now());
        let ban_until = to_sql(self.clock.now().saturating_add(self.ban_duration.as_secs()));
        let threshold = i64::from(self.threshold);

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO ip_bans (ip, attempts, last_attempt, banned_until)
                 VALUES (?1, 1, ?2, 0)
                 ON CONFLICT(ip) DO UPDATE SET
                    attempts = attempts + 1,
                    last_attempt = excluded.last_attempt",
                params![ip, now],
            )?;
            let (attempts, banned_until): (i64, i64) = tx.query_row(
                "SELECT attempts, banned_until FROM ip_bans WHERE ip = ?1",
                params![ip],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let mut crossed = false;
            if attempts >= threshold {
                crossed = banned_until <= now;
                tx.execute(
                    "UPDATE ip_bans SET banned_until = ?2 WHERE ip = ?1",
                    params![ip, ban_until],
                )?;
            }
            tx.commit()?;
            Ok(crossed)
        })
        .await
    }

    async fn clear(&self, ip: &str) -> Result<(), MirrorError> {
        let ip = ip.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM ip_bans WHERE ip = ?1", params![ip])?;
            Ok(())
        })
        .await
    }

    async fn clear_all(&self) -> Result<usize, MirrorError> {
        self.with_conn(|conn| conn.execute("DELETE FROM ip_bans", []))
            .await
    }

    async fn sweep_expired(&self) -> Result<usize, MirrorError> {
        let now = to_sql(self.clock.now());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM ip_bans WHERE banned_until > 0 AND banned_until <= ?1",
                params![now],
            )
        })
        .await
    }

    async fn active_bans(&self) -> Result<Vec<DurableRecord>, MirrorError> {
        let now = to_sql(self.clock.now());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ip, attempts, last_attempt, banned_until FROM ip_bans
                 WHERE banned_until > ?1 ORDER BY ip",
            )?;
            let rows = stmt.query_map(params![now], |row| {
                Ok(DurableRecord {
                    ip: row.get(0)?,
                    attempts: u32::try_from(row.get::<_, i64>(1)?).unwrap_or(u32::MAX),
                    last_attempt: from_sql(row.get(2)?),
                    banned_until: from_sql(row.get(3)?),
                })
            })?;
            let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }
}

/// Failure-tolerant handle on an optional [`BanMirror`].
///
/// Every operation degrades to a neutral answer when the mirror is absent or
/// unavailable, so callers never block on persistence.
#[derive(Clone, Default)]
pub struct DurableBans {
    inner: Option<Arc<dyn BanMirror>>,
}

impl DurableBans {
    /// Wrap a mirror.
    pub fn new(mirror: Arc<dyn BanMirror>) -> Self {
        Self {
            inner: Some(mirror),
        }
    }

    /// A handle with no backing store (memory-only operation).
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether a backing store is configured.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Banned according to the durable store; `false` when unavailable.
    pub async fn is_banned(&self, ip: &str) -> bool {
        let Some(mirror) = &self.inner else {
            return false;
        };
        match mirror.check_banned(ip).await {
            Ok(banned) => banned,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Durable ban check failed, using memory only");
                false
            }
        }
    }

    /// Count a failure; returns whether the durable threshold was crossed.
    pub async fn record_failure(&self, ip: &str) -> bool {
        let Some(mirror) = &self.inner else {
            return false;
        };
        match mirror.record_failure(ip).await {
            Ok(crossed) => {
                if crossed {
                    tracing::warn!(ip = %ip, "Persisted ban for IP");
                }
                crossed
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Failed to persist authentication failure");
                false
            }
        }
    }

    /// Drop the address's durable row.
    pub async fn clear(&self, ip: &str) {
        if let Some(mirror) = &self.inner {
            if let Err(e) = mirror.clear(ip).await {
                tracing::warn!(ip = %ip, error = %e, "Failed to clear persisted ban");
            }
        }
    }

    /// Drop all durable rows.
    pub async fn clear_all(&self) -> usize {
        let Some(mirror) = &self.inner else {
            return 0;
        };
        match mirror.clear_all().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear persisted bans");
                0
            }
        }
    }

    /// Open durable bans; empty when unavailable.
    pub async fn active_bans(&self) -> Vec<DurableRecord> {
        let Some(mirror) = &self.inner else {
            return Vec::new();
        };
        match mirror.active_bans().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list persisted bans");
                Vec::new()
            }
        }
    }

    /// Startup reconciliation: purge elapsed rows, then return the open ones.
    pub async fn startup_sweep(&self) -> Vec<DurableRecord> {
        let Some(mirror) = &self.inner else {
            return Vec::new();
        };
        match mirror.sweep_expired().await {
            Ok(n) if n > 0 => tracing::info!(removed = n, "Purged expired persisted bans"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired persisted bans"),
        }
        self.active_bans().await
    }
}

impl std::fmt::Debug for DurableBans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBans")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
