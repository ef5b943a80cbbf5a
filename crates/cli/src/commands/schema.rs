use crate::utils::{parse_json, print_json};
use anyhow::{Context, Result};
use omnidb_adapters::{AdapterFactory, ColumnSpec, DatabaseAdapter, ForeignKeyRef};
use serde::de::DeserializeOwned;

fn parse_arg<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_value(parse_json(raw, what)?).with_context(|| format!("invalid {}", what))
}

pub async fn show(factory: &AdapterFactory, connection: &str) -> Result<()> {
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.get_schema().await?)
}

pub async fn create_table(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    columns: &str,
    foreign_keys: Option<&str>,
) -> Result<()> {
    let columns: Vec<ColumnSpec> = parse_arg(columns, "columns")?;
    let foreign_keys: Vec<ForeignKeyRef> = match foreign_keys {
        Some(raw) => parse_arg(raw, "foreign keys")?,
        None => Vec::new(),
    };
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.create_table(table, &columns, &foreign_keys).await?)
}

pub async fn drop_table(factory: &AdapterFactory, connection: &str, table: &str) -> Result<()> {
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.drop_table(table).await?)
}

pub async fn add_column(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    column: &str,
) -> Result<()> {
    let column: ColumnSpec = parse_arg(column, "column")?;
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.add_column(table, &column).await?)
}

pub async fn drop_column(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    column: &str,
) -> Result<()> {
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.drop_column(table, column).await?)
}

pub async fn add_foreign_key(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    foreign_key: &str,
) -> Result<()> {
    let foreign_key: ForeignKeyRef = parse_arg(foreign_key, "foreign key")?;
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.add_foreign_key(table, &foreign_key).await?)
}

pub async fn drop_foreign_key(
    factory: &AdapterFactory,
    connection: &str,
    table: &str,
    constraint_name: &str,
) -> Result<()> {
    let adapter = factory.create_adapter(connection)?;
    print_json(&adapter.drop_foreign_key(table, constraint_name).await?)
}
