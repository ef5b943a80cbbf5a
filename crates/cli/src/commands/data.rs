use crate::utils::{parse_id, parse_json, parse_object, print_json};
use anyhow::Result;
use omnidb_adapters::{AdapterFactory, DatabaseAdapter, InsertData};

pub async fn read(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    filter: Option<&str>,
    limit: Option<i64>,
) -> Result<()> {
    let filters = parse_object(filter, "filter")?;
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.read(table, &filters, limit).await?)
}

pub async fn insert(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    data: &str,
) -> Result<()> {
    let data = InsertData::try_from(parse_json(data, "data")?)?;
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.insert(table, data).await?)
}

pub async fn update(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    id: &str,
    updates: &str,
    id_column: Option<&str>,
) -> Result<()> {
    let updates = parse_object(Some(updates), "updates")?;
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.update(table, &parse_id(id), &updates, id_column).await?)
}

pub async fn delete(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    id: &str,
    id_column: Option<&str>,
) -> Result<()> {
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.delete(table, &parse_id(id), id_column).await?)
}
