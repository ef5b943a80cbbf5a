//! Connection pool management
//!
//! One `PgPool` per distinct connection string. The registry owns pool
//! lifetime: adapters ask for a pool, never build one. Adapters that
//! [`acquire`](PoolRegistry::acquire) a pool are counted as holders, and the
//! pool closes when the last holder releases it.
//!
//! Background connection failures surface in the `before_acquire` hook: a
//! connection idle past the configured threshold is pinged first, and a
//! failed ping is logged and the connection discarded instead of handed out.

use crate::config::PoolSettings;
use crate::error::AdapterResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Point-in-time counters for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

#[derive(Debug)]
struct PooledEntry {
    pool: PgPool,
    holders: usize,
}

/// Registry of relational pools keyed by connection string
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<String, PooledEntry>,
    settings: PoolSettings,
}

impl PoolRegistry {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            pools: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Return the pool for `url`, creating it on first use.
    ///
    /// Check and insert happen under the map's entry lock with no await in
    /// between, so concurrent callers never build two pools for one URL.
    pub fn get(&self, url: &str) -> AdapterResult<PgPool> {
        if let Some(entry) = self.pools.get(url) {
            return Ok(entry.pool.clone());
        }
        self.checkout(url, 0)
    }

    /// Like [`get`](Self::get), and count the caller as a holder until it
    /// calls [`release`](Self::release)
    pub fn acquire(&self, url: &str) -> AdapterResult<PgPool> {
        self.checkout(url, 1)
    }

    fn checkout(&self, url: &str, holders: usize) -> AdapterResult<PgPool> {
        match self.pools.entry(url.to_string()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.holders += holders;
                Ok(entry.pool.clone())
            }
            Entry::Vacant(entry) => {
                let pool = self.create_pool(url)?;
                debug!(
                    max_connections = self.settings.max_connections,
                    "Created connection pool"
                );
                entry.insert(PooledEntry {
                    pool: pool.clone(),
                    holders,
                });
                Ok(pool)
            }
        }
    }

    /// Drop one holder of the pool for `url`; the last holder closes it
    pub async fn release(&self, url: &str) {
        let last = match self.pools.entry(url.to_string()) {
            Entry::Occupied(mut entry) => {
                let holders = &mut entry.get_mut().holders;
                *holders = holders.saturating_sub(1);
                if *holders == 0 {
                    Some(entry.remove().pool)
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        };
        if let Some(pool) = last {
            pool.close().await;
            debug!("Closed connection pool after its last holder released it");
        }
    }

    pub fn holders(&self, url: &str) -> usize {
        self.pools.get(url).map_or(0, |entry| entry.holders)
    }

    /// Replace the pool for `url` with a fresh one.
    ///
    /// The old pool is closed in the background; closing waits for checked
    /// out connections and never fails the caller.
    pub async fn reset(&self, url: &str) -> AdapterResult<PgPool> {
        let fresh = self.create_pool(url)?;
        let old = match self.pools.entry(url.to_string()) {
            Entry::Occupied(mut entry) => {
                Some(std::mem::replace(&mut entry.get_mut().pool, fresh.clone()))
            }
            Entry::Vacant(entry) => {
                entry.insert(PooledEntry {
                    pool: fresh.clone(),
                    holders: 0,
                });
                None
            }
        };
        if let Some(old) = old {
            tokio::spawn(async move {
                old.close().await;
                debug!("Closed replaced connection pool");
            });
        }
        info!("Connection pool reset");
        Ok(fresh)
    }

    /// Remove and close the pool for `url` whatever its holders
    pub async fn close(&self, url: &str) {
        if let Some((_, entry)) = self.pools.remove(url) {
            entry.pool.close().await;
        }
    }

    /// Close every pool; used at shutdown
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        let pools: Vec<PgPool> = keys
            .iter()
            .filter_map(|key| self.pools.remove(key).map(|(_, entry)| entry.pool))
            .collect();
        let count = pools.len();
        join_all(pools.iter().map(|pool| pool.close())).await;
        if count > 0 {
            info!(pools = count, "Closed all connection pools");
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.pools.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn stats(&self, url: &str) -> Option<PoolStats> {
        self.pools.get(url).map(|entry| PoolStats {
            size: entry.pool.size(),
            idle: entry.pool.num_idle(),
        })
    }

    /// Build a lazily connecting pool; the first acquire opens a connection.
    ///
    /// TLS follows the URL's `sslmode`, defaulting to `prefer`.
    fn create_pool(&self, url: &str) -> AdapterResult<PgPool> {
        let options = PgConnectOptions::from_str(url)?;
        let ping_after = self.settings.ping_idle_after();

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .min_connections(self.settings.min_connections)
            .acquire_timeout(self.settings.acquire_timeout())
            .idle_timeout(self.settings.idle_timeout_secs.map(std::time::Duration::from_secs))
            .max_lifetime(self.settings.max_lifetime_secs.map(std::time::Duration::from_secs))
            .before_acquire(move |conn, meta| {
                Box::pin(async move {
                    if meta.idle_for < ping_after {
                        return Ok(true);
                    }
                    match conn.ping().await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            warn!(
                                error = %e,
                                idle_secs = meta.idle_for.as_secs(),
                                "Discarding broken pooled connection"
                            );
                            Ok(false)
                        }
                    }
                })
            })
            .connect_lazy_with(options);

        Ok(pool)
    }
}
