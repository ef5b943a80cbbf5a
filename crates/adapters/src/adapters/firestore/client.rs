//! Firestore document access
//!
//! [`FirestoreApi`] is the seam the adapter talks to. The production
//! implementation speaks the Firestore REST v1 API with an API key.

use super::value::{Fields, FirestoreValue};
use crate::descriptor::BackendKind;
use crate::error::{AdapterError, AdapterResult};
use crate::security::{validate_collection_name, validate_document_id};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_API_ROOT: &str = "https://firestore.googleapis.com/v1";

/// Most writes one commit may carry
pub const MAX_BATCH_WRITES: usize = 500;

/// A document read back from a collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
}

/// One write in an atomic commit
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or replace the whole document
    Set {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// Overwrite the `mask` paths; a masked path absent from `fields` is removed
    Update {
        collection: String,
        id: String,
        fields: Fields,
        mask: Vec<String>,
    },
    Delete { collection: String, id: String },
}

#[async_trait]
pub trait FirestoreApi: Send + Sync {
    /// Cheap authenticated round trip
    async fn ping(&self) -> AdapterResult<()>;

    async fn get(&self, collection: &str, id: &str) -> AdapterResult<Option<StoredDocument>>;

    /// Create a document; `id: None` lets the server pick one
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
    ) -> AdapterResult<StoredDocument>;

    /// Replace the document, or with `merge` only the given fields
    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> AdapterResult<()>;

    /// Patch an existing document; `None` when it does not exist
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mask: &[String],
    ) -> AdapterResult<Option<StoredDocument>>;

    /// Deleting an absent document succeeds
    async fn delete(&self, collection: &str, id: &str) -> AdapterResult<()>;

    /// Equality-filtered query; no filters and no limit lists the collection
    async fn query(
        &self,
        collection: &str,
        filters: &[(String, FirestoreValue)],
        limit: Option<i64>,
    ) -> AdapterResult<Vec<StoredDocument>>;

    /// Apply up to [`MAX_BATCH_WRITES`] writes atomically
    async fn commit(&self, writes: &[Write]) -> AdapterResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<DocumentBody>,
}

/// Quote a field path segment unless it is a plain identifier
pub fn field_path(name: &str) -> String {
    let simple = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// `structuredQuery` body for `:runQuery`
pub fn structured_query(
    collection: &str,
    filters: &[(String, FirestoreValue)],
    limit: Option<i64>,
) -> Value {
    let mut query = json!({ "from": [{ "collectionId": collection }] });

    let mut terms: Vec<Value> = filters
        .iter()
        .map(|(field, value)| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(field) },
                    "op": "EQUAL",
                    "value": value,
                }
            })
        })
        .collect();
    match terms.len() {
        0 => {}
        1 => query["where"] = terms.remove(0),
        _ => {
            query["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": terms }
            })
        }
    }

    if let Some(limit) = limit {
        query["limit"] = json!(limit);
    }
    json!({ "structuredQuery": query })
}

pub struct FirestoreRestClient {
    client: Client,
    api_key: String,
    /// `projects/<id>/databases/(default)/documents`
    documents_path: String,
    /// `<api root>/<documents_path>`
    documents_url: String,
    documents_base: Url,
}

impl FirestoreRestClient {
    pub fn new(
        project_id: &str,
        api_key: &str,
        api_root: Option<&str>,
        timeout: Duration,
    ) -> AdapterResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let documents_path = format!("projects/{}/databases/(default)/documents", project_id);
        let root = api_root.unwrap_or(DEFAULT_API_ROOT).trim_end_matches('/');
        let documents_url = format!("{}/{}", root, documents_path);
        let documents_base = Url::parse(&documents_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                AdapterError::Configuration(format!("invalid Firestore API root '{}'", root))
            })?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            documents_url,
            documents_base,
            documents_path,
        })
    }

    pub fn documents_url(&self) -> &str {
        &self.documents_url
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path, collection, id)
    }

    /// Documents URL with each segment percent-encoded as one path segment
    fn segments_url(&self, segments: &[&str]) -> AdapterResult<Url> {
        let mut url = self.documents_base.clone();
        url.path_segments_mut()
            .map_err(|_| AdapterError::Configuration("Firestore API root has no path".to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self, collection: &str) -> AdapterResult<Url> {
        validate_collection_name(collection)?;
        self.segments_url(&[collection])
    }

    fn document_url(&self, collection: &str, id: &str) -> AdapterResult<Url> {
        validate_collection_name(collection)?;
        validate_document_id(id)?;
        self.segments_url(&[collection, id])
    }

    fn keyed(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("key", &self.api_key)])
    }

    pub(crate) fn patch_request(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
        mask: Option<&[String]>,
        must_exist: bool,
    ) -> AdapterResult<RequestBuilder> {
        let mut request = self.keyed(self.client.patch(self.document_url(collection, id)?));
        if let Some(mask) = mask {
            let paths: Vec<(&str, String)> = mask
                .iter()
                .map(|path| ("updateMask.fieldPaths", field_path(path)))
                .collect();
            request = request.query(&paths);
        }
        if must_exist {
            request = request.query(&[("currentDocument.exists", "true")]);
        }
        Ok(request.json(&json!({ "fields": fields })))
    }

    pub(crate) fn commit_body(&self, writes: &[Write]) -> Value {
        let writes: Vec<Value> = writes
            .iter()
            .map(|write| match write {
                Write::Set {
                    collection,
                    id,
                    fields,
                } => json!({
                    "update": { "name": self.document_name(collection, id), "fields": fields }
                }),
                Write::Update {
                    collection,
                    id,
                    fields,
                    mask,
                } => json!({
                    "update": { "name": self.document_name(collection, id), "fields": fields },
                    "updateMask": {
                        "fieldPaths": mask.iter().map(|p| field_path(p)).collect::<Vec<_>>()
                    },
                    "currentDocument": { "exists": true },
                }),
                Write::Delete { collection, id } => json!({
                    "delete": self.document_name(collection, id)
                }),
            })
            .collect();
        json!({ "writes": writes })
    }

    fn stored(body: DocumentBody) -> StoredDocument {
        let id = body.name.rsplit('/').next().unwrap_or_default().to_string();
        StoredDocument {
            id,
            fields: body.fields,
        }
    }
}

async fn check(response: Response) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);
    Err(AdapterError::Api {
        backend: BackendKind::Firebase,
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl FirestoreApi for FirestoreRestClient {
    async fn ping(&self) -> AdapterResult<()> {
        let response = self
            .keyed(self.client.get(format!("{}/_collections_registry", self.documents_url)))
            .query(&[("pageSize", "1")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await.map(|_| ())
    }

    async fn get(&self, collection: &str, id: &str) -> AdapterResult<Option<StoredDocument>> {
        let response = self
            .keyed(self.client.get(self.document_url(collection, id)?))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: DocumentBody = check(response).await?.json().await?;
        Ok(Some(Self::stored(body)))
    }

    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
    ) -> AdapterResult<StoredDocument> {
        let mut request = self.keyed(self.client.post(self.collection_url(collection)?));
        if let Some(id) = id {
            request = request.query(&[("documentId", id)]);
        }
        let response = request.json(&json!({ "fields": fields })).send().await?;
        let body: DocumentBody = check(response).await?.json().await?;
        debug!(collection, id = %body.name, "Created document");
        Ok(Self::stored(body))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> AdapterResult<()> {
        let mask: Option<Vec<String>> = merge.then(|| fields.keys().cloned().collect());
        let response = self
            .patch_request(collection, id, &fields, mask.as_deref(), false)?
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mask: &[String],
    ) -> AdapterResult<Option<StoredDocument>> {
        let response = self
            .patch_request(collection, id, &fields, Some(mask), true)?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: DocumentBody = check(response).await?.json().await?;
        Ok(Some(Self::stored(body)))
    }

    async fn delete(&self, collection: &str, id: &str) -> AdapterResult<()> {
        let response = self
            .keyed(self.client.delete(self.document_url(collection, id)?))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[(String, FirestoreValue)],
        limit: Option<i64>,
    ) -> AdapterResult<Vec<StoredDocument>> {
        let response = self
            .keyed(self.client.post(format!("{}:runQuery", self.documents_url)))
            .json(&structured_query(collection, filters, limit))
            .send()
            .await?;
        let items: Vec<RunQueryItem> = check(response).await?.json().await?;
        Ok(items
            .into_iter()
            .filter_map(|item| item.document)
            .map(Self::stored)
            .collect())
    }

    async fn commit(&self, writes: &[Write]) -> AdapterResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let response = self
            .keyed(self.client.post(format!("{}:commit", self.documents_url)))
            .json(&self.commit_body(writes))
            .send()
            .await?;
        check(response).await?;
        debug!(writes = writes.len(), "Committed batch");
        Ok(())
    }
}
