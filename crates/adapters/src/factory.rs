//! Adapter factory and cache
//!
//! The factory turns connection input into a shared [`Adapter`], keeping one
//! instance per cache key. Keys are the raw connection string, or the JSON
//! form of a structured descriptor.

use crate::adapters::{
    Adapter, DatabaseAdapter, FirestoreAdapter, MongoAdapter, PostgresAdapter, SupabaseAdapter,
};
use crate::config::AdapterConfig;
use crate::descriptor::{self, required, BackendKind, ConnectionDescriptor, ConnectionInput};
use crate::error::AdapterResult;
use crate::pool::PoolRegistry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Snapshot of the adapter cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactoryStatistics {
    pub total_adapters: usize,
    pub connected_adapters: usize,
    pub adapters_by_type: BTreeMap<BackendKind, usize>,
}

pub struct AdapterFactory {
    cache: DashMap<String, Arc<Adapter>>,
    pools: Arc<PoolRegistry>,
    config: AdapterConfig,
}

impl AdapterFactory {
    pub fn new(pools: Arc<PoolRegistry>, config: AdapterConfig) -> Self {
        Self {
            cache: DashMap::new(),
            pools,
            config,
        }
    }

    /// Factory with its own pool registry sized from `config`
    pub fn from_config(config: AdapterConfig) -> Self {
        let pools = Arc::new(PoolRegistry::new(config.pool.clone()));
        Self::new(pools, config)
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Cached adapter for `input`, building one on first use.
    ///
    /// No connection is made here; adapters connect lazily.
    pub fn create_adapter(&self, input: impl Into<ConnectionInput>) -> AdapterResult<Arc<Adapter>> {
        let (key, descriptor) = input.into().resolve()?;
        if let Some(adapter) = self.cache.get(&key) {
            debug!(backend = %descriptor.kind, "Adapter cache hit");
            return Ok(Arc::clone(adapter.value()));
        }

        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(|| self.build(&descriptor).map(Arc::new))?;
        Ok(Arc::clone(entry.value()))
    }

    fn build(&self, descriptor: &ConnectionDescriptor) -> AdapterResult<Adapter> {
        debug!(backend = %descriptor.kind, "Creating adapter");
        let adapter = match descriptor.kind {
            BackendKind::Postgres => {
                let url = required(descriptor.kind, &descriptor.url, "url")?;
                Adapter::Postgres(PostgresAdapter::new(url, Arc::clone(&self.pools), &self.config))
            }
            BackendKind::Supabase => Adapter::Supabase(SupabaseAdapter::from_descriptor(
                descriptor,
                Arc::clone(&self.pools),
                &self.config,
            )?),
            BackendKind::Firebase => {
                Adapter::Firestore(FirestoreAdapter::from_descriptor(descriptor, &self.config)?)
            }
            BackendKind::MongoDb => {
                let url = required(descriptor.kind, &descriptor.url, "url")?;
                Adapter::Mongo(MongoAdapter::new(url, &self.config))
            }
        };
        Ok(adapter)
    }

    /// Build (or reuse) the adapter and connect it
    pub async fn create_and_connect(
        &self,
        input: impl Into<ConnectionInput>,
    ) -> AdapterResult<Arc<Adapter>> {
        let adapter = self.create_adapter(input)?;
        adapter.connect().await?;
        Ok(adapter)
    }

    /// Health check; any failure, including bad input, reports `false`
    pub async fn test_connection(&self, input: impl Into<ConnectionInput>) -> bool {
        match self.create_adapter(input) {
            Ok(adapter) => adapter.test_connection().await,
            Err(e) => {
                debug!(error = %e, "Connection test rejected input");
                false
            }
        }
    }

    pub fn get_database_type(
        &self,
        input: impl Into<ConnectionInput>,
    ) -> AdapterResult<BackendKind> {
        let (_, descriptor) = input.into().resolve()?;
        Ok(descriptor.kind)
    }

    /// Disconnect every cached adapter concurrently, then empty the cache
    pub async fn disconnect_all(&self) {
        let adapters: Vec<(String, Arc<Adapter>)> = self
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        self.cache.clear();

        let results = join_all(adapters.iter().map(|(_, adapter)| adapter.disconnect())).await;
        for ((key, adapter), result) in adapters.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    backend = %adapter.backend_kind(),
                    key = %descriptor::redact_credentials(key),
                    error = %e,
                    "Disconnect failed"
                );
            }
        }
        self.pools.close_all().await;
        info!(adapters = adapters.len(), "Disconnected all adapters");
    }

    pub fn get_statistics(&self) -> FactoryStatistics {
        let mut adapters_by_type = BTreeMap::new();
        let mut connected_adapters = 0;
        for entry in self.cache.iter() {
            *adapters_by_type.entry(entry.backend_kind()).or_insert(0) += 1;
            if entry.is_connected() {
                connected_adapters += 1;
            }
        }
        FactoryStatistics {
            total_adapters: self.cache.len(),
            connected_adapters,
            adapters_by_type,
        }
    }

    pub fn supported_types(&self) -> &'static [BackendKind] {
        &BackendKind::ALL
    }

    pub fn validate_connection_string(&self, connection_string: &str) -> bool {
        descriptor::validate_connection_string(connection_string)
    }

    pub fn connection_string_examples(&self) -> Vec<(BackendKind, &'static str)> {
        descriptor::connection_string_examples()
    }

    pub fn get_cached_adapter(&self, key: &str) -> Option<Arc<Adapter>> {
        self.cache.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop one cache entry; the adapter itself is not disconnected
    pub fn remove_from_cache(&self, key: &str) -> Option<Arc<Adapter>> {
        self.cache.remove(key).map(|(_, adapter)| adapter)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::from_config(AdapterConfig::default())
    }
}
