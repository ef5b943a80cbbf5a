//! The uniform adapter contract and its four implementations
//!
//! Every backend implements [`DatabaseAdapter`]. The closed [`Adapter`] enum
//! is what the factory hands out; it dispatches each call to its variant.

pub mod firestore;
pub mod mongo;
pub mod postgres;
pub mod supabase;

pub use firestore::FirestoreAdapter;
pub use mongo::MongoAdapter;
pub use postgres::PostgresAdapter;
pub use supabase::SupabaseAdapter;

use crate::descriptor::BackendKind;
use crate::error::AdapterResult;
use crate::types::{
    ColumnSpec, Filters, ForeignKeyRef, InsertData, MessageResponse, Record, RecordResponse,
    RowsResponse, SchemaResponse,
};
use async_trait::async_trait;
use serde_json::Value;

/// Operations every backend supports.
///
/// Operations needing a live connection connect on first use. Schema
/// evolution on schemaless backends succeeds with an explanatory message
/// instead of failing as unsupported.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn backend_kind(&self) -> BackendKind;

    fn is_connected(&self) -> bool;

    /// Establish connectivity; calling it again is a no-op
    async fn connect(&self) -> AdapterResult<()>;

    /// Release resources; safe when not connected
    async fn disconnect(&self) -> AdapterResult<()>;

    /// Health check that never errors and leaves adapter state untouched
    async fn test_connection(&self) -> bool;

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeyRef],
    ) -> AdapterResult<MessageResponse>;

    /// Dropping an absent table succeeds
    async fn drop_table(&self, table: &str) -> AdapterResult<MessageResponse>;

    async fn insert(&self, table: &str, data: InsertData) -> AdapterResult<RowsResponse>;

    async fn read(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> AdapterResult<RowsResponse>;

    /// `id_column` defaults per backend when `None`
    async fn update(
        &self,
        table: &str,
        id: &Value,
        updates: &Record,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse>;

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse>;

    async fn get_schema(&self) -> AdapterResult<SchemaResponse>;

    async fn add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<MessageResponse>;

    async fn drop_column(&self, table: &str, column: &str) -> AdapterResult<MessageResponse>;

    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyRef,
    ) -> AdapterResult<MessageResponse>;

    async fn drop_foreign_key(
        &self,
        table: &str,
        constraint_name: &str,
    ) -> AdapterResult<MessageResponse>;
}

/// One adapter per backend kind
pub enum Adapter {
    Postgres(PostgresAdapter),
    Supabase(SupabaseAdapter),
    Firestore(FirestoreAdapter),
    Mongo(MongoAdapter),
}

macro_rules! dispatch {
    ($self:ident, $adapter:ident => $call:expr) => {
        match $self {
            Adapter::Postgres($adapter) => $call,
            Adapter::Supabase($adapter) => $call,
            Adapter::Firestore($adapter) => $call,
            Adapter::Mongo($adapter) => $call,
        }
    };
}

impl Adapter {
    pub fn as_supabase(&self) -> Option<&SupabaseAdapter> {
        match self {
            Adapter::Supabase(adapter) => Some(adapter),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("kind", &self.backend_kind())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl DatabaseAdapter for Adapter {
    fn backend_kind(&self) -> BackendKind {
        dispatch!(self, a => a.backend_kind())
    }

    fn is_connected(&self) -> bool {
        dispatch!(self, a => a.is_connected())
    }

    async fn connect(&self) -> AdapterResult<()> {
        dispatch!(self, a => a.connect().await)
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        dispatch!(self, a => a.disconnect().await)
    }

    async fn test_connection(&self) -> bool {
        dispatch!(self, a => a.test_connection().await)
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeyRef],
    ) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.create_table(table, columns, foreign_keys).await)
    }

    async fn drop_table(&self, table: &str) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.drop_table(table).await)
    }

    async fn insert(&self, table: &str, data: InsertData) -> AdapterResult<RowsResponse> {
        dispatch!(self, a => a.insert(table, data).await)
    }

    async fn read(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> AdapterResult<RowsResponse> {
        dispatch!(self, a => a.read(table, filters, limit).await)
    }

    async fn update(
        &self,
        table: &str,
        id: &Value,
        updates: &Record,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse> {
        dispatch!(self, a => a.update(table, id, updates, id_column).await)
    }

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse> {
        dispatch!(self, a => a.delete(table, id, id_column).await)
    }

    async fn get_schema(&self) -> AdapterResult<SchemaResponse> {
        dispatch!(self, a => a.get_schema().await)
    }

    async fn add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.add_column(table, column).await)
    }

    async fn drop_column(&self, table: &str, column: &str) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.drop_column(table, column).await)
    }

    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyRef,
    ) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.add_foreign_key(table, foreign_key).await)
    }

    async fn drop_foreign_key(
        &self,
        table: &str,
        constraint_name: &str,
    ) -> AdapterResult<MessageResponse> {
        dispatch!(self, a => a.drop_foreign_key(table, constraint_name).await)
    }
}
