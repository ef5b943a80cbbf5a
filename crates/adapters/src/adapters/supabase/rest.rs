//! Minimal PostgREST client for the Supabase data API.

use crate::descriptor::BackendKind;
use crate::error::{AdapterError, AdapterResult};
use crate::types::{effective_limit, Filters, Record};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct PostgrestClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl PostgrestClient {
    /// `project_url` is `https://<ref>.supabase.co`
    pub fn new(project_url: &str, anon_key: &str, timeout: Duration) -> AdapterResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// Rows written or deleted come back in the response body
    fn returning(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorized(request)
            .header("Prefer", "return=representation")
    }

    pub(crate) fn insert_request(&self, table: &str, rows: &[Record]) -> RequestBuilder {
        self.returning(self.client.post(self.table_url(table)))
            .json(rows)
    }

    pub(crate) fn select_request(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> RequestBuilder {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(equality_terms(filters));
        if let Some(limit) = effective_limit(limit) {
            query.push(("limit".to_string(), limit.to_string()));
        }
        self.authorized(self.client.get(self.table_url(table)))
            .query(&query)
    }

    pub(crate) fn update_request(
        &self,
        table: &str,
        id_column: &str,
        id: &Value,
        updates: &Record,
    ) -> RequestBuilder {
        self.returning(self.client.patch(self.table_url(table)))
            .query(&[(id_column, eq(id))])
            .json(updates)
    }

    pub(crate) fn delete_request(
        &self,
        table: &str,
        id_column: &str,
        id: &Value,
    ) -> RequestBuilder {
        self.returning(self.client.delete(self.table_url(table)))
            .query(&[(id_column, eq(id))])
    }

    pub async fn insert(&self, table: &str, rows: &[Record]) -> AdapterResult<Vec<Record>> {
        rows_from(self.insert_request(table, rows).send().await?).await
    }

    pub async fn select(
        &self,
        table: &str,
        filters: &Filters,
        limit: Option<i64>,
    ) -> AdapterResult<Vec<Record>> {
        rows_from(self.select_request(table, filters, limit).send().await?).await
    }

    pub async fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &Value,
        updates: &Record,
    ) -> AdapterResult<Vec<Record>> {
        rows_from(
            self.update_request(table, id_column, id, updates)
                .send()
                .await?,
        )
        .await
    }

    pub async fn delete(
        &self,
        table: &str,
        id_column: &str,
        id: &Value,
    ) -> AdapterResult<Vec<Record>> {
        rows_from(self.delete_request(table, id_column, id).send().await?).await
    }

    /// Any answer below 500 means the API is up, even an auth rejection
    pub async fn is_reachable(&self) -> bool {
        let request = self.authorized(self.client.get(format!("{}/", self.base_url)));
        match request.send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!(error = %e, "PostgREST health check failed");
                false
            }
        }
    }
}

/// `col=eq.<value>` for every non-null filter
fn equality_terms(filters: &Filters) -> Vec<(String, String)> {
    filters
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(column, value)| (column.clone(), eq(value)))
        .collect()
}

fn eq(value: &Value) -> String {
    match value {
        Value::String(s) => format!("eq.{}", s),
        other => format!("eq.{}", other),
    }
}

async fn rows_from(response: Response) -> AdapterResult<Vec<Record>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(AdapterError::Api {
        backend: BackendKind::Supabase,
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> PostgrestClient {
        PostgrestClient::new("https://abc.supabase.co/", "anon", Duration::from_secs(5)).unwrap()
    }

    fn filters(value: Value) -> Filters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_base_url() {
        assert_eq!(client().base_url(), "https://abc.supabase.co/rest/v1");
    }

    #[test]
    fn test_select_request_skips_null_filters() {
        let request = client()
            .select_request(
                "users",
                &filters(json!({"status": "active", "age": 30, "deleted": null})),
                Some(5),
            )
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/users");
        assert_eq!(
            request.url().query(),
            Some("select=*&status=eq.active&age=eq.30&limit=5")
        );
        assert_eq!(request.headers()["apikey"], "anon");
        assert_eq!(request.headers()["authorization"], "Bearer anon");
    }

    #[test]
    fn test_select_without_positive_limit() {
        let request = client()
            .select_request("users", &Filters::new(), Some(0))
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("select=*"));
    }

    #[test]
    fn test_mutations_ask_for_representation() {
        let client = client();
        let updates = filters(json!({"name": "b"}));

        let update = client
            .update_request("users", "id", &json!(7), &updates)
            .build()
            .unwrap();
        assert_eq!(update.method(), reqwest::Method::PATCH);
        assert_eq!(update.url().query(), Some("id=eq.7"));
        assert_eq!(update.headers()["prefer"], "return=representation");

        let delete = client
            .delete_request("users", "uuid", &json!("x-1"))
            .build()
            .unwrap();
        assert_eq!(delete.method(), reqwest::Method::DELETE);
        assert_eq!(delete.url().query(), Some("uuid=eq.x-1"));

        let insert = client
            .insert_request("users", &[updates])
            .build()
            .unwrap();
        assert_eq!(insert.method(), reqwest::Method::POST);
        assert_eq!(insert.headers()["prefer"], "return=representation");
    }
}
