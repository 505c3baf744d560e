// src/core/lock.rs

//! Component A: single-writer election across controller replicas via a
//! shared key-value store with TTL-refresh semantics (spec.md §4.A).
//!
//! Suitable only for a single key-value instance, not a cluster quorum:
//! losing the connection to that instance is indistinguishable from
//! losing the lock itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use redis::AsyncCommands;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::errors::ControllerError;
use crate::core::metrics;

/// A distributed, TTL-refreshed mutual-exclusion lock backed by a single
/// Redis-compatible instance.
pub struct DistributedLock {
    client: redis::Client,
    key: String,
    ttl: Duration,
}

/// A held lock. Dropping this does not release the key (Redis TTLs expire
/// it); call `unlock` for a clean, best-effort release (spec.md §4.A).
pub struct LockGuard {
    released: Arc<Notify>,
    lost: watch::Receiver<bool>,
    refresh_task: tokio::task::JoinHandle<()>,
}

impl LockGuard {
    /// Cancels the refresh loop. Best-effort: it does not try to delete
    /// the key from the store, mirroring spec.md §4.A's "best-effort".
    pub async fn unlock(self) {
        self.released.notify_one();
        let _ = self.refresh_task.await;
    }

    /// Resolves once the refresh loop has observed the key lost or
    /// expired out from under this holder — a fatal condition for the
    /// holder per spec.md §5 ("losing the key is a fatal condition").
    pub async fn lost(&mut self) {
        // `lost` starts false; wait until it flips.
        while !*self.lost.borrow() {
            if self.lost.changed().await.is_err() {
                return;
            }
        }
    }
}

impl DistributedLock {
    pub fn new(redis_url: &str, key: impl Into<String>, ttl: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid KV store URL")?;
        Ok(Self {
            client,
            key: key.into(),
            ttl,
        })
    }

    /// Blocks until the named key is acquired or `cancel` fires. On
    /// acquisition, starts a background refresh loop at half the
    /// configured TTL (spec.md §4.A "Algorithm").
    pub async fn lock(&self, cancel: CancellationToken) -> anyhow::Result<LockGuard> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to KV store for lock acquisition")?;

        let holder_value = uuid::Uuid::new_v4().to_string();
        let ttl_ms = self.ttl.as_millis() as u64;

        let mut attempt_interval = tokio::time::interval(self.ttl / 2);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(anyhow!("lock acquisition cancelled"));
                }
                _ = attempt_interval.tick() => {
                    let acquired: bool = redis::cmd("SET")
                        .arg(&self.key)
                        .arg(&holder_value)
                        .arg("PX")
                        .arg(ttl_ms)
                        .arg("NX")
                        .query_async::<Option<String>>(&mut conn)
                        .await
                        .map(|v| v.is_some())
                        .unwrap_or(false);

                    if acquired {
                        info!(key = %self.key, "acquired distributed lock");
                        metrics::LOCK_HELD.set(1.0);
                        break;
                    }
                }
            }
        }

        let released = Arc::new(Notify::new());
        let (lost_tx, lost_rx) = watch::channel(false);

        let refresh_task = tokio::spawn(Self::refresh_loop(
            self.client.clone(),
            self.key.clone(),
            holder_value,
            self.ttl,
            released.clone(),
            lost_tx,
        ));

        Ok(LockGuard {
            released,
            lost: lost_rx,
            refresh_task,
        })
    }

    /// Refreshes the lock at half the TTL. A failed refresh (key lost or
    /// expired) is fatal for the holder (spec.md §4.A, §5) — it marks the
    /// guard as lost so the caller can surrender its role.
    async fn refresh_loop(
        client: redis::Client,
        key: String,
        holder_value: String,
        ttl: Duration,
        released: Arc<Notify>,
        lost_tx: watch::Sender<bool>,
    ) {
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                error!("lock refresh loop could not connect to KV store: {e}");
                let _ = lost_tx.send(true);
                metrics::LOCK_HELD.set(0.0);
                return;
            }
        };

        let ttl_ms = ttl.as_millis() as u64;
        let mut ticker = tokio::time::interval(ttl / 2);

        loop {
            tokio::select! {
                _ = released.notified() => {
                    info!(%key, "releasing distributed lock");
                    metrics::LOCK_HELD.set(0.0);
                    return;
                }
                _ = ticker.tick() => {
                    match Self::refresh_once(&mut conn, &key, &holder_value, ttl_ms).await {
                        Ok(true) => {}
                        Ok(false) => {
                            error!(%key, "lost distributed lock: key held by another holder or expired");
                            let _ = lost_tx.send(true);
                            metrics::LOCK_HELD.set(0.0);
                            return;
                        }
                        Err(e) => {
                            error!(%key, "lock refresh failed: {e}");
                            let _ = lost_tx.send(true);
                            metrics::LOCK_HELD.set(0.0);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// A set-if-present refresh: only extends the TTL if this holder's
    /// value is still the one stored (a Lua script would be atomic; a
    /// single connection refreshing on a fixed cadence is sufficient here
    /// since only the holder ever refreshes its own key).
    async fn refresh_once(
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
        holder_value: &str,
        ttl_ms: u64,
    ) -> Result<bool, ControllerError> {
        let current: Option<String> = conn.get(key).await?;
        if current.as_deref() != Some(holder_value) {
            return Ok(false);
        }
        let _: () = conn.pexpire(key, ttl_ms as i64).await?;
        Ok(true)
    }
}
