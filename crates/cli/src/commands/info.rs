use crate::utils::print_json;
use anyhow::Result;
use omnidb_adapters::{redact_credentials, AdapterFactory, DatabaseAdapter};
use serde_json::json;

pub fn kind(factory: &AdapterFactory, connection: &str) -> Result<()> {
    let kind = factory.get_database_type(connection)?;
    print_json(&json!({ "type": kind }))
}

/// Health check; a failed check exits non-zero
pub async fn test(factory: &AdapterFactory, connection: &str) -> Result<bool> {
    let reachable = factory.test_connection(connection).await;
    print_json(&json!({
        "connection": redact_credentials(connection),
        "reachable": reachable,
    }))?;
    Ok(reachable)
}

pub fn types(factory: &AdapterFactory) -> Result<()> {
    print_json(&factory.supported_types())
}

pub fn examples(factory: &AdapterFactory) -> Result<()> {
    let examples: Vec<_> = factory
        .connection_string_examples()
        .into_iter()
        .map(|(kind, example)| json!({ "type": kind, "example": example }))
        .collect();
    print_json(&examples)
}

/// Connect, then report the factory's cache statistics
pub async fn stats(factory: &AdapterFactory, connection: &str) -> Result<()> {
    let adapter = factory.create_and_connect(connection).await?;
    tracing::debug!(backend = %adapter.backend_kind(), "Connected for statistics");
    print_json(&factory.get_statistics())
}
