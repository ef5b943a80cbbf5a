//! # omnidb-adapters: one CRUD and schema API over several databases
//!
//! A connection string picks the backend: PostgreSQL, Supabase (PostgREST
//! with a SQL fallback), Cloud Firestore, or MongoDB. The
//! [`AdapterFactory`] builds and caches one [`Adapter`] per connection,
//! and every adapter speaks the same [`DatabaseAdapter`] contract.

pub mod adapters;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod inference;
pub mod pool;
pub mod retry;
pub mod security;
pub mod sql;
pub mod types;

// Re-export the main surface
pub use adapters::{
    Adapter, DatabaseAdapter, FirestoreAdapter, MongoAdapter, PostgresAdapter, SupabaseAdapter,
};
pub use config::{AdapterConfig, ConfigError, PoolSettings};
pub use descriptor::{
    connection_string_examples, parse_connection_string, redact_credentials,
    validate_connection_string, BackendKind, ConnectionDescriptor, ConnectionInput,
};
pub use error::{AdapterError, AdapterResult};
pub use factory::{AdapterFactory, FactoryStatistics};
pub use pool::{PoolRegistry, PoolStats};
pub use retry::{query_with_retry, RetryPolicy};
pub use types::*;
