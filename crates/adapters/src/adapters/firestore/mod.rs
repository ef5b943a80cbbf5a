//! Cloud Firestore adapter
//!
//! Collections have no catalog, so schema lives in a metadata document per
//! collection (`<collection>_metadata/schema`) and discovery goes through a
//! registry collection that every create and insert writes to.

mod client;
#[cfg(test)]
mod memory;
mod value;

pub use client::{
    field_path, structured_query, FirestoreApi, FirestoreRestClient, StoredDocument, Write,
    DEFAULT_API_ROOT, MAX_BATCH_WRITES,
};
pub use value::{fields_to_record, record_to_fields, Fields, FirestoreValue};

use super::DatabaseAdapter;
use crate::config::AdapterConfig;
use crate::descriptor::{required, BackendKind, ConnectionDescriptor};
use crate::error::AdapterResult;
use crate::inference::infer_columns;
use crate::security::{validate_collection_name, validate_document_id, validate_field_name};
use crate::sql::builder::default_constraint_name;
use crate::types::{
    effective_limit, id_to_string, ColumnSpec, Filters, ForeignKeyRef, InsertData,
    MessageResponse, Record, RecordResponse, RowsResponse, SchemaResponse, TableDescriptor,
    DATA_INSERTED, NOT_FOUND_DELETE, NOT_FOUND_UPDATE, RECORD_DELETED, RECORD_UPDATED,
};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const REGISTRY_COLLECTION: &str = "_collections_registry";
const METADATA_DOCUMENT: &str = "schema";
const SCHEMA_FIELD: &str = "_schema";
const CREATED_AT: &str = "_createdAt";
const UPDATED_AT: &str = "_updatedAt";

/// Checked for documents when the registry is empty or unreadable
const COMMON_COLLECTIONS: &[&str] = &[
    "users", "products", "orders", "posts", "comments", "categories", "articles", "customers",
    "inventory", "transactions", "reviews", "notifications", "messages", "events", "logs",
    "settings", "profiles", "bookings", "appointments", "tasks", "projects",
];

/// Checked for metadata documents in the same fallback
const METADATA_COLLECTIONS: &[&str] = &[
    "users", "products", "orders", "posts", "comments", "categories", "articles", "customers",
    "inventory", "transactions", "reviews",
];

/// Client-generated document id, same alphabet and length as the SDKs use
pub fn generate_document_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

fn metadata_collection(collection: &str) -> String {
    format!("{}_metadata", collection)
}

/// Declared column as stored in collection metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default_value: Option<String>,
}

impl From<&ColumnSpec> for MetadataColumn {
    fn from(column: &ColumnSpec) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.column_type.clone(),
            required: column.not_null,
            default_value: column.default_value.clone(),
        }
    }
}

impl From<MetadataColumn> for ColumnSpec {
    fn from(column: MetadataColumn) -> Self {
        ColumnSpec {
            name: column.name,
            column_type: column.column_type,
            not_null: column.required,
            default_value: column.default_value,
            ..ColumnSpec::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionMetadata {
    #[serde(default)]
    columns: Vec<MetadataColumn>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKeyRef>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
}

impl CollectionMetadata {
    fn describe(self, name: &str) -> TableDescriptor {
        TableDescriptor {
            foreign_keys: self.foreign_keys,
            ..TableDescriptor::collection(name, self.columns.into_iter().map(Into::into).collect())
        }
    }

    fn to_fields(&self) -> AdapterResult<Fields> {
        let mut schema = match FirestoreValue::from_json(&serde_json::to_value(self)?) {
            FirestoreValue::MapValue(map) => map,
            _ => value::MapValue::default(),
        };
        if self.created_at.is_none() {
            schema.fields.insert("createdAt".to_string(), FirestoreValue::now());
        }
        let mut fields = Fields::new();
        fields.insert(SCHEMA_FIELD.to_string(), FirestoreValue::MapValue(schema));
        Ok(fields)
    }

    fn from_fields(fields: &Fields) -> AdapterResult<Option<Self>> {
        match fields.get(SCHEMA_FIELD) {
            Some(schema) => Ok(Some(serde_json::from_value(schema.to_json())?)),
            None => Ok(None),
        }
    }
}

/// Output shape: the document id first, then its fields
fn document_record(document: &StoredDocument) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), Value::String(document.id.clone()));
    record.extend(fields_to_record(&document.fields));
    record
}

/// Columns from one sample document, internal `_` fields skipped
fn infer_from_sample(document: &StoredDocument) -> Vec<ColumnSpec> {
    infer_columns(
        document
            .fields
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.kind())),
    )
}

pub struct FirestoreAdapter {
    project_id: String,
    api: Arc<dyn FirestoreApi>,
    connected: AtomicBool,
}

impl FirestoreAdapter {
    pub fn new(project_id: impl Into<String>, api: Arc<dyn FirestoreApi>) -> Self {
        Self {
            project_id: project_id.into(),
            api,
            connected: AtomicBool::new(false),
        }
    }

    /// REST-backed adapter; needs `projectId` and `apiKey`
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        config: &AdapterConfig,
    ) -> AdapterResult<Self> {
        let project_id = required(BackendKind::Firebase, &descriptor.project_id, "projectId")?;
        let api_key = required(BackendKind::Firebase, &descriptor.api_key, "apiKey")?;
        let client = FirestoreRestClient::new(
            project_id,
            api_key,
            config.firestore_base_url.as_deref(),
            config.http_timeout(),
        )?;
        Ok(Self::new(project_id, Arc::new(client)))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn ensure_connected(&self) -> AdapterResult<()> {
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    /// Commit in chunks the backend accepts
    async fn commit_all(&self, writes: &[Write]) -> AdapterResult<()> {
        for chunk in writes.chunks(MAX_BATCH_WRITES) {
            self.api.commit(chunk).await?;
        }
        Ok(())
    }

    async fn register_collection(&self, collection: &str) -> AdapterResult<()> {
        let mut fields = Fields::new();
        fields.insert("name".to_string(), FirestoreValue::string(collection));
        fields.insert("createdAt".to_string(), FirestoreValue::now());
        fields.insert("lastUpdated".to_string(), FirestoreValue::now());
        self.api
            .set(REGISTRY_COLLECTION, collection, fields, true)
            .await
    }

    async fn load_metadata(&self, collection: &str) -> AdapterResult<Option<CollectionMetadata>> {
        match self
            .api
            .get(&metadata_collection(collection), METADATA_DOCUMENT)
            .await?
        {
            Some(document) => CollectionMetadata::from_fields(&document.fields),
            None => Ok(None),
        }
    }

    async fn save_metadata(
        &self,
        collection: &str,
        metadata: &CollectionMetadata,
    ) -> AdapterResult<()> {
        self.api
            .update(
                &metadata_collection(collection),
                METADATA_DOCUMENT,
                metadata.to_fields()?,
                &[SCHEMA_FIELD.to_string()],
            )
            .await
            .map(|_| ())
    }

    /// Document addressed by `id`: by document id for `id`/`_id`, otherwise
    /// the first document whose `id_column` equals `id`
    async fn locate(
        &self,
        collection: &str,
        id: &Value,
        id_column: Option<&str>,
    ) -> AdapterResult<Option<StoredDocument>> {
        match id_column.unwrap_or("id") {
            "id" | "_id" => {
                let id = id_to_string(id)?;
                validate_document_id(&id)?;
                self.api.get(collection, &id).await
            }
            column => {
                validate_field_name(column)?;
                let filter = [(column.to_string(), FirestoreValue::from_json(id))];
                Ok(self
                    .api
                    .query(collection, &filter, Some(1))
                    .await?
                    .into_iter()
                    .next())
            }
        }
    }

    async fn sample_columns(&self, collection: &str) -> AdapterResult<Vec<ColumnSpec>> {
        Ok(self
            .api
            .query(collection, &[], Some(1))
            .await?
            .first()
            .map(infer_from_sample)
            .unwrap_or_default())
    }

    async fn describe_collection(&self, collection: &str) -> AdapterResult<TableDescriptor> {
        match self.load_metadata(collection).await? {
            Some(metadata) => Ok(metadata.describe(collection)),
            None => Ok(TableDescriptor::collection(
                collection,
                self.sample_columns(collection).await?,
            )),
        }
    }

    async fn registered_collections(&self) -> AdapterResult<Vec<String>> {
        let documents = self.api.query(REGISTRY_COLLECTION, &[], None).await?;
        Ok(documents
            .into_iter()
            .map(|document| {
                document
                    .fields
                    .get("name")
                    .and_then(FirestoreValue::as_str)
                    .map(str::to_string)
                    .unwrap_or(document.id)
            })
            .collect())
    }

    /// Discovery without a registry: non-empty common collections first,
    /// then metadata documents not already found
    async fn scan_known_collections(&self) -> Vec<TableDescriptor> {
        let mut found = Vec::new();
        for &name in COMMON_COLLECTIONS {
            match self.api.query(name, &[], Some(1)).await {
                Ok(sample) => {
                    if let Some(document) = sample.first() {
                        found.push(TableDescriptor::collection(name, infer_from_sample(document)));
                    }
                }
                Err(e) => debug!(collection = name, error = %e, "Collection not accessible"),
            }
        }
        for &name in METADATA_COLLECTIONS {
            if found.iter().any(|t: &TableDescriptor| t.name == name) {
                continue;
            }
            if let Ok(Some(metadata)) = self.load_metadata(name).await {
                found.push(metadata.describe(name));
            }
        }
        found
    }
}

#[async_trait]
impl DatabaseAdapter for FirestoreAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Firebase
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The REST client is stateless; connecting only marks the adapter ready
    async fn connect(&self) -> AdapterResult<()> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(project = %self.project_id, "Firestore client ready");
        }
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        match self.api.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(project = %self.project_id, error = %e, "Firestore connection test failed");
                false
            }
        }
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeyRef],
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        self.ensure_connected().await?;

        let metadata = CollectionMetadata {
            columns: columns.iter().map(MetadataColumn::from).collect(),
            foreign_keys: foreign_keys.to_vec(),
            created_at: None,
            kind: "collection_metadata".to_string(),
        };
        self.api
            .set(
                &metadata_collection(table),
                METADATA_DOCUMENT,
                metadata.to_fields()?,
                false,
            )
            .await?;
        self.register_collection(table).await?;

        Ok(MessageResponse::done(format!(
            "Firestore collection '{}' schema created successfully.",
            table
        )))
    }

    async fn drop_table(&self, table: &str) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        self.ensure_connected().await?;

        let writes: Vec<Write> = self
            .api
            .query(table, &[], None)
            .await?
            .into_iter()
            .map(|document| Write::Delete {
                collection: table.to_string(),
                id: document.id,
            })
            .collect();
        self.commit_all(&writes).await?;
        self.api
            .delete(&metadata_collection(table), METADATA_DOCUMENT)
            .await?;
        self.api.delete(REGISTRY_COLLECTION, table).await?;
        debug!(collection = table, documents = writes.len(), "Dropped collection");

        Ok(MessageResponse::done(format!(
            "Firestore collection '{}' dropped successfully.",
            table
        )))
    }

    async fn insert(&self, table: &str, data: InsertData) -> AdapterResult<RowsResponse> {
        validate_collection_name(table)?;
        let records = data.into_records()?;
        for key in records.iter().flat_map(|r| r.keys()) {
            validate_field_name(key)?;
        }
        self.ensure_connected().await?;

        let stamped: Vec<Fields> = records
            .iter()
            .map(|record| {
                let mut fields = record_to_fields(record);
                fields.insert(CREATED_AT.to_string(), FirestoreValue::now());
                fields.insert(UPDATED_AT.to_string(), FirestoreValue::now());
                fields
            })
            .collect();

        let inserted = if let [fields] = stamped.as_slice() {
            let created = self.api.create(table, None, fields.clone()).await?;
            let stored = self.api.get(table, &created.id).await?.unwrap_or(created);
            vec![document_record(&stored)]
        } else {
            let documents: Vec<StoredDocument> = stamped
                .into_iter()
                .map(|fields| StoredDocument {
                    id: generate_document_id(),
                    fields,
                })
                .collect();
            let writes: Vec<Write> = documents
                .iter()
                .map(|document| Write::Set {
                    collection: table.to_string(),
                    id: document.id.clone(),
                    fields: document.fields.clone(),
                })
                .collect();
            self.commit_all(&writes).await?;
            documents.iter().map(document_record).collect()
        };

        if let Err(e) = self.register_collection(table).await {
            warn!(collection = table, error = %e, "Could not register collection");
        }
        Ok(RowsResponse::ok_with_message(inserted, DATA_INSERTED))
    }

    async fn read(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> AdapterResult<RowsResponse> {
        validate_collection_name(table)?;
        let terms = filters
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| -> AdapterResult<(String, FirestoreValue)> {
                validate_field_name(field)?;
                Ok((field.clone(), FirestoreValue::from_json(value)))
            })
            .collect::<AdapterResult<Vec<_>>>()?;
        self.ensure_connected().await?;

        let documents = self
            .api
            .query(table, &terms, effective_limit(limit))
            .await?;
        Ok(RowsResponse::ok(
            documents.iter().map(document_record).collect(),
        ))
    }

    async fn update(
        &self,
        table: &str,
        id: &Value,
        updates: &Record,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse> {
        validate_collection_name(table)?;
        for key in updates.keys() {
            validate_field_name(key)?;
        }
        self.ensure_connected().await?;

        let Some(target) = self.locate(table, id, id_column).await? else {
            return Ok(RecordResponse::not_found(NOT_FOUND_UPDATE));
        };

        let mut fields = record_to_fields(updates);
        fields.insert(UPDATED_AT.to_string(), FirestoreValue::now());
        let mask: Vec<String> = fields.keys().cloned().collect();

        Ok(
            match self.api.update(table, &target.id, fields, &mask).await? {
                Some(document) => {
                    RecordResponse::ok_with_message(document_record(&document), RECORD_UPDATED)
                }
                None => RecordResponse::not_found(NOT_FOUND_UPDATE),
            },
        )
    }

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse> {
        validate_collection_name(table)?;
        self.ensure_connected().await?;

        let Some(snapshot) = self.locate(table, id, id_column).await? else {
            return Ok(RecordResponse::not_found(NOT_FOUND_DELETE));
        };
        self.api.delete(table, &snapshot.id).await?;
        Ok(RecordResponse::ok_with_message(
            document_record(&snapshot),
            RECORD_DELETED,
        ))
    }

    async fn get_schema(&self) -> AdapterResult<SchemaResponse> {
        self.ensure_connected().await?;

        let registered = match self.registered_collections().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Collections registry unreadable, probing common names");
                Vec::new()
            }
        };
        if registered.is_empty() {
            return Ok(SchemaResponse::ok(self.scan_known_collections().await));
        }

        let mut tables = Vec::with_capacity(registered.len());
        for name in registered {
            match self.describe_collection(&name).await {
                Ok(table) => tables.push(table),
                Err(e) => warn!(collection = %name, error = %e, "Could not describe collection"),
            }
        }
        Ok(SchemaResponse::ok(tables))
    }

    async fn add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        validate_field_name(&column.name)?;
        self.ensure_connected().await?;

        if let Some(mut metadata) = self.load_metadata(table).await? {
            metadata.columns.push(MetadataColumn::from(column));
            self.save_metadata(table, &metadata).await?;
        }
        Ok(MessageResponse::done(format!(
            "Firestore is schemaless. Field '{}' definition added to metadata.",
            column.name
        )))
    }

    async fn drop_column(&self, table: &str, column: &str) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        validate_field_name(column)?;
        self.ensure_connected().await?;

        let writes: Vec<Write> = self
            .api
            .query(table, &[], None)
            .await?
            .into_iter()
            .filter(|document| document.fields.contains_key(column))
            .map(|document| Write::Update {
                collection: table.to_string(),
                id: document.id,
                fields: Fields::new(),
                mask: vec![column.to_string()],
            })
            .collect();
        self.commit_all(&writes).await?;

        if let Some(mut metadata) = self.load_metadata(table).await? {
            metadata.columns.retain(|c| c.name != column);
            self.save_metadata(table, &metadata).await?;
        }
        Ok(MessageResponse::done(format!(
            "Field '{}' removed from {} documents in collection '{}'.",
            column,
            writes.len(),
            table
        )))
    }

    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyRef,
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        self.ensure_connected().await?;

        if let Some(mut metadata) = self.load_metadata(table).await? {
            let mut foreign_key = foreign_key.clone();
            if foreign_key.constraint_name.is_none() {
                foreign_key.constraint_name =
                    Some(default_constraint_name(table, &foreign_key.column, None));
            }
            metadata.foreign_keys.push(foreign_key);
            self.save_metadata(table, &metadata).await?;
        }
        Ok(MessageResponse::done(format!(
            "Firestore uses references instead of foreign keys. \
             Relationship metadata added for '{}' -> '{}'.",
            foreign_key.column, foreign_key.reference_table
        )))
    }

    async fn drop_foreign_key(
        &self,
        table: &str,
        constraint_name: &str,
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        self.ensure_connected().await?;

        if let Some(mut metadata) = self.load_metadata(table).await? {
            metadata
                .foreign_keys
                .retain(|fk| fk.constraint_name.as_deref() != Some(constraint_name));
            self.save_metadata(table, &metadata).await?;
        }
        Ok(MessageResponse::done(format!(
            "Foreign key metadata '{}' removed from collection '{}'.",
            constraint_name, table
        )))
    }
}
