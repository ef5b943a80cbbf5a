//! MongoDB adapter
//!
//! Collections get a lenient field model the first time they are touched,
//! either declared by `create_table` or inferred from the first record
//! written. Writes run through the model; output documents use hex
//! ObjectIds and RFC 3339 dates.

mod convert;
mod model;

pub use model::{CollectionModel, FieldSpec};

use super::DatabaseAdapter;
use crate::config::AdapterConfig;
use crate::descriptor::{redact_credentials, BackendKind};
use crate::error::{AdapterError, AdapterResult};
use crate::inference::infer_columns;
use crate::security::{validate_collection_name, validate_field_name};
use crate::types::{
    effective_limit, ColumnSpec, Filters, ForeignKeyRef, InsertData, MessageResponse, Record,
    RecordResponse, RowsResponse, SchemaResponse, TableDescriptor, DATA_INSERTED,
    NOT_FOUND_DELETE, NOT_FOUND_UPDATE, RECORD_DELETED, RECORD_UPDATED,
};
use async_trait::async_trait;
use convert::{bson_kind, document_to_record, json_to_bson};
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_DATABASE: &str = "test";
const DEFAULT_ID_COLUMN: &str = "_id";
const NAMESPACE_EXISTS: i32 = 48;
const NAMESPACE_NOT_FOUND: i32 = 26;

pub struct MongoAdapter {
    url: String,
    state: RwLock<Option<(Client, Database)>>,
    connected: AtomicBool,
    models: DashMap<String, CollectionModel>,
    connect_timeout: Duration,
    health_check_timeout: Duration,
}

impl MongoAdapter {
    pub fn new(url: impl Into<String>, config: &AdapterConfig) -> Self {
        Self {
            url: url.into(),
            state: RwLock::new(None),
            connected: AtomicBool::new(false),
            models: DashMap::new(),
            connect_timeout: config.connect_timeout(),
            health_check_timeout: config.health_check_timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Model bound to `collection`, if any
    pub fn model(&self, collection: &str) -> Option<CollectionModel> {
        self.models.get(collection).map(|model| model.clone())
    }

    async fn client(&self, server_selection: Duration) -> AdapterResult<(Client, Database)> {
        let mut options = ClientOptions::parse(self.url.as_str())
            .await
            .map_err(|e| AdapterError::connection(BackendKind::MongoDb, e))?;
        options.server_selection_timeout = Some(server_selection);
        let client = Client::with_options(options)
            .map_err(|e| AdapterError::connection(BackendKind::MongoDb, e))?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        Ok((client, database))
    }

    async fn database(&self) -> AdapterResult<Database> {
        let cached = self.state.read().as_ref().map(|(_, db)| db.clone());
        if let Some(database) = cached {
            return Ok(database);
        }
        self.connect().await?;
        self.state
            .read()
            .as_ref()
            .map(|(_, db)| db.clone())
            .ok_or_else(|| {
                AdapterError::connection(BackendKind::MongoDb, "client unavailable after connect")
            })
    }

    async fn collection(&self, name: &str) -> AdapterResult<Collection<Document>> {
        validate_collection_name(name)?;
        Ok(self.database().await?.collection::<Document>(name))
    }

    /// Bound model for `collection`, binding one from `sample` when unseen
    fn bind_model(&self, collection: &str, sample: Option<&Record>) -> CollectionModel {
        self.models
            .entry(collection.to_string())
            .or_insert_with(|| {
                debug!(collection, "Binding inferred model");
                CollectionModel::infer(sample)
            })
            .clone()
    }
}

/// `None` and `id` both address `_id`
fn resolve_id_column(id_column: Option<&str>) -> &str {
    match id_column {
        None | Some("id") => DEFAULT_ID_COLUMN,
        Some(column) => column,
    }
}

fn id_filter(model: &CollectionModel, id_column: &str, id: &Value) -> AdapterResult<Document> {
    validate_field_name(id_column)?;
    let mut filter = Document::new();
    filter.insert(id_column, model.cast_value(id_column, id));
    Ok(filter)
}

fn equality_filter(model: &CollectionModel, filters: &Filters) -> AdapterResult<Document> {
    let mut filter = Document::new();
    for (field, value) in filters {
        validate_field_name(field)?;
        filter.insert(field.clone(), model.cast_value(field, value));
    }
    Ok(filter)
}

/// Document ready for `insert_many`: model applied, `_id` and timestamps set
fn prepare_insert(
    model: &CollectionModel,
    collection: &str,
    record: &Record,
) -> AdapterResult<Document> {
    let mut document = model.apply(collection, record)?;
    let now = Bson::DateTime(DateTime::now());
    if !document.contains_key("_id") {
        document.insert("_id", ObjectId::new());
    }
    if !document.contains_key("createdAt") {
        document.insert("createdAt", now.clone());
    }
    document.insert("updatedAt", now);
    Ok(document)
}

/// Plain fields go into `$set`; operator keys pass through unchanged
fn update_document(model: &CollectionModel, updates: &Record) -> AdapterResult<Document> {
    if updates.is_empty() {
        return Err(AdapterError::validation("update requires at least one field"));
    }
    let mut set = Document::new();
    let mut update = Document::new();
    for (key, value) in updates {
        if key == "$set" {
            let Value::Object(fields) = value else {
                return Err(AdapterError::validation("$set requires an object"));
            };
            for (field, value) in model.cast_fields(fields) {
                set.insert(field, value);
            }
        } else if key.starts_with('$') {
            update.insert(key.clone(), json_to_bson(value));
        } else {
            validate_field_name(key)?;
            set.insert(key.clone(), model.cast_value(key, value));
        }
    }
    set.insert("updatedAt", DateTime::now());
    update.insert("$set", set);
    Ok(update)
}

fn command_code(error: &mongodb::error::Error) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> AdapterResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let (client, database) = self.client(self.connect_timeout).await?;
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AdapterError::connection(BackendKind::MongoDb, e))?;

        info!(
            url = %redact_credentials(&self.url),
            database = database.name(),
            "Connected to MongoDB"
        );
        *self.state.write() = Some((client, database));
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        let state = self.state.write().take();
        if let Some((client, _)) = state {
            client.shutdown().await;
            info!(url = %redact_credentials(&self.url), "Disconnected from MongoDB");
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        let (client, database) = match self.client(self.health_check_timeout).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, "Connection test failed");
                return false;
            }
        };
        let reachable = match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Connection test failed");
                false
            }
        };
        client.shutdown().await;
        reachable
    }

    /// Binds the declared model, then creates the collection
    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeyRef],
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        for column in columns {
            validate_field_name(&column.name)?;
        }
        let model = CollectionModel::declared(columns, foreign_keys);
        let database = self.database().await?;

        match database.create_collection(table).await {
            Ok(()) => {}
            Err(e) if command_code(&e) == Some(NAMESPACE_EXISTS) => {
                debug!(collection = table, "Collection already exists");
            }
            Err(e) => return Err(e.into()),
        }
        self.models.insert(table.to_string(), model);
        Ok(MessageResponse::done(format!(
            "Collection '{}' created successfully.",
            table
        )))
    }

    async fn drop_table(&self, table: &str) -> AdapterResult<MessageResponse> {
        let collection = self.collection(table).await?;
        self.models.remove(table);
        match collection.drop().await {
            Ok(()) => Ok(MessageResponse::done(format!(
                "Collection '{}' dropped successfully.",
                table
            ))),
            Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(MessageResponse::done(
                format!("Collection '{}' doesn't exist.", table),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert(&self, table: &str, data: InsertData) -> AdapterResult<RowsResponse> {
        validate_collection_name(table)?;
        let records = data.into_records()?;
        let model = self.bind_model(table, records.first());
        let documents = records
            .iter()
            .map(|record| prepare_insert(&model, table, record))
            .collect::<AdapterResult<Vec<_>>>()?;

        let collection = self.collection(table).await?;
        collection.insert_many(&documents).await?;
        debug!(collection = table, rows = documents.len(), "Inserted documents");

        let rows = documents.into_iter().map(document_to_record).collect();
        Ok(RowsResponse::ok_with_message(rows, DATA_INSERTED))
    }

    async fn read(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> AdapterResult<RowsResponse> {
        validate_collection_name(table)?;
        let model = self.bind_model(table, None);
        let filter = equality_filter(&model, filters)?;

        let collection = self.collection(table).await?;
        let mut find = collection.find(filter);
        if let Some(limit) = effective_limit(limit) {
            find = find.limit(limit);
        }
        let documents: Vec<Document> = find.await?.try_collect().await?;
        Ok(RowsResponse::ok(
            documents.into_iter().map(document_to_record).collect(),
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
        let model = self.model(table).unwrap_or_default();
        let filter = id_filter(&model, resolve_id_column(id_column), id)?;
        let update = update_document(&model, updates)?;

        let collection = self.collection(table).await?;
        let updated = collection
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(match updated {
            Some(document) => {
                RecordResponse::ok_with_message(document_to_record(document), RECORD_UPDATED)
            }
            None => RecordResponse::not_found(NOT_FOUND_UPDATE),
        })
    }

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        id_column: Option<&str>,
    ) -> AdapterResult<RecordResponse> {
        validate_collection_name(table)?;
        let model = self.model(table).unwrap_or_default();
        let filter = id_filter(&model, resolve_id_column(id_column), id)?;

        let collection = self.collection(table).await?;
        Ok(match collection.find_one_and_delete(filter).await? {
            Some(document) => {
                RecordResponse::ok_with_message(document_to_record(document), RECORD_DELETED)
            }
            None => RecordResponse::not_found(NOT_FOUND_DELETE),
        })
    }

    /// Columns are inferred from one sample document per collection
    async fn get_schema(&self) -> AdapterResult<SchemaResponse> {
        let database = self.database().await?;
        let mut names = database.list_collection_names().await?;
        names.retain(|name| !name.starts_with("system."));
        names.sort();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let sample = database
                .collection::<Document>(&name)
                .find_one(doc! {})
                .await?;
            let columns = sample.map_or_else(Vec::new, |document| {
                infer_columns(
                    document
                        .iter()
                        .filter(|(field, _)| field.as_str() != "__v")
                        .map(|(field, value)| (field.clone(), bson_kind(value))),
                )
            });
            tables.push(TableDescriptor::collection(name, columns));
        }
        Ok(SchemaResponse::ok(tables))
    }

    async fn add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        validate_field_name(&column.name)?;
        Ok(MessageResponse::done(format!(
            "MongoDB is schemaless. Field '{}' can be added to documents in '{}' directly.",
            column.name, table
        )))
    }

    async fn drop_column(&self, table: &str, column: &str) -> AdapterResult<MessageResponse> {
        validate_field_name(column)?;
        let collection = self.collection(table).await?;
        let mut unset = Document::new();
        unset.insert(column, "");
        let result = collection
            .update_many(doc! {}, doc! { "$unset": unset })
            .await?;

        if let Some(mut model) = self.models.get_mut(table) {
            model.remove_field(column);
        }
        Ok(MessageResponse::done(format!(
            "Field '{}' removed from {} documents in collection '{}'.",
            column, result.modified_count, table
        )))
    }

    async fn add_foreign_key(
        &self,
        table: &str,
        foreign_key: &ForeignKeyRef,
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        // Nothing is enforced, so an incomplete definition is accepted too.
        Ok(MessageResponse::done(format!(
            "MongoDB uses references instead of foreign keys. \
             Store ObjectIds from '{}' in field '{}'.",
            foreign_key.reference_table, foreign_key.column
        )))
    }

    async fn drop_foreign_key(
        &self,
        table: &str,
        constraint_name: &str,
    ) -> AdapterResult<MessageResponse> {
        validate_collection_name(table)?;
        Ok(MessageResponse::done(format!(
            "MongoDB has no foreign key constraints. Nothing to drop for '{}'.",
            constraint_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::FieldKind;
    use serde_json::json;

    fn adapter() -> MongoAdapter {
        MongoAdapter::new("mongodb://localhost:27017/app", &AdapterConfig::default())
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_id_column_defaults_to_object_id() {
        assert_eq!(resolve_id_column(None), "_id");
        assert_eq!(resolve_id_column(Some("id")), "_id");
        assert_eq!(resolve_id_column(Some("email")), "email");
    }

    #[test]
    fn test_id_filter_casts_hex_ids() {
        let model = CollectionModel::default();
        let filter = id_filter(&model, "_id", &json!("507f1f77bcf86cd799439011")).unwrap();
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));

        let filter = id_filter(&model, "_id", &json!("custom-key")).unwrap();
        assert_eq!(filter.get_str("_id").unwrap(), "custom-key");
    }

    #[test]
    fn test_filters_reject_operators() {
        let model = CollectionModel::default();
        let err = equality_filter(&model, &record(json!({"$where": "1 == 1"}))).unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }

    #[test]
    fn test_update_document_shape() {
        let model = CollectionModel::infer(Some(&record(json!({"age": 1}))));
        let update = update_document(
            &model,
            &record(json!({"age": "42", "$inc": {"visits": 1}})),
        )
        .unwrap();

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get("age"), Some(&Bson::Int32(42)));
        assert!(matches!(set.get("updatedAt"), Some(Bson::DateTime(_))));
        assert_eq!(update.get_document("$inc").unwrap().get_i32("visits").unwrap(), 1);

        assert!(update_document(&model, &Record::new()).is_err());
    }

    #[test]
    fn test_prepare_insert_stamps_documents() {
        let model = CollectionModel::default();
        let document = prepare_insert(&model, "users", &record(json!({"name": "Ada"}))).unwrap();
        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
        assert!(document.contains_key("createdAt"));
        assert!(document.contains_key("updatedAt"));

        let output = document_to_record(document);
        assert!(output["_id"].as_str().is_some_and(|id| id.len() == 24));
    }

    #[test]
    fn test_first_record_binds_the_model() {
        let adapter = adapter();
        let first = record(json!({"name": "Ada", "age": 36}));
        adapter.bind_model("users", Some(&first));
        adapter.bind_model("users", Some(&record(json!({"other": true}))));

        let model = adapter.model("users").unwrap();
        assert_eq!(model.len(), 2);
        assert!(model.field("other").is_none());
    }

    #[test]
    fn test_mixed_types_share_a_collection() {
        let adapter = adapter();
        let first = record(json!({"x": 1, "y": "s"}));
        let model = adapter.bind_model("things", Some(&first));
        let stored = prepare_insert(&model, "things", &first).unwrap();
        assert_eq!(stored.get("x"), Some(&Bson::Int32(1)));
        assert_eq!(stored.get_str("y").unwrap(), "s");

        let second = record(json!({"x": "a"}));
        let model = adapter.bind_model("things", Some(&second));
        assert_eq!(model.field("x").unwrap().kind, FieldKind::Number);
        let stored = prepare_insert(&model, "things", &second).unwrap();
        assert_eq!(stored.get_str("x").unwrap(), "a");
        assert!(!stored.contains_key("y"));

        let numeric_text = prepare_insert(&model, "things", &record(json!({"x": "7"}))).unwrap();
        assert_eq!(numeric_text.get("x"), Some(&Bson::Int32(7)));
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let adapter = adapter();
        let err = adapter
            .insert("bad/name", InsertData::One(record(json!({"a": 1}))))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));

        let err = adapter
            .read("users", &record(json!({"$gt": 1})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_schema_changes_without_io() {
        let adapter = adapter();
        let response = adapter
            .add_column("users", &ColumnSpec::new("nickname", "string"))
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.message.unwrap().contains("schemaless"));

        let response = adapter
            .add_foreign_key("posts", &ForeignKeyRef::new("author", "users", "_id"))
            .await
            .unwrap();
        assert!(response.message.unwrap().contains("references"));

        let partial = adapter
            .add_foreign_key("posts", &ForeignKeyRef::new("author", "", ""))
            .await
            .unwrap();
        assert!(partial.success);
        assert!(!adapter.is_connected());
    }
}
