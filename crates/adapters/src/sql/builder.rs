//! Statement builders for the relational adapters
//!
//! Builders are pure: they validate caller identifiers, quote them and return
//! the SQL text with its positional parameters. Nothing here touches a pool.

use crate::error::{AdapterError, AdapterResult};
use crate::security::{
    escape_identifier, quote_identifier, validate_expression, validate_policy_operation,
    validate_type_token,
};
use crate::types::{ColumnSpec, Filters, ForeignKeyRef, Record};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Longest identifier PostgreSQL keeps; longer names are truncated
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// SQL text plus positional parameters (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }

    fn ddl(sql: String) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Wrap a `SELECT` so each row arrives as one JSON object
    pub fn select_as_json(self) -> Self {
        Self::new(
            format!("SELECT row_to_json(r) AS record FROM ({}) r", self.sql),
            self.params,
        )
    }

    /// Wrap a data-modifying statement with `RETURNING *` the same way
    pub fn returning_as_json(self) -> Self {
        Self::new(
            format!("WITH r AS ({}) SELECT row_to_json(r) AS record FROM r", self.sql),
            self.params,
        )
    }
}

/// `$<index>` read as a value of `column` in the already quoted `table`.
///
/// The parameter is bound as `jsonb`; `jsonb_populate_record` converts it
/// with the column's input function, the way an untyped literal would be.
pub fn column_param(quoted_table: &str, column: &str, index: usize) -> AdapterResult<String> {
    let quoted_column = quote_identifier(column)?;
    Ok(format!(
        "(jsonb_populate_record(NULL::{}, jsonb_build_object('{}', ${}))).{}",
        quoted_table, column, index, quoted_column
    ))
}

/// `"<name>" <TYPE> [NOT NULL] [DEFAULT <value>]`
pub fn column_definition(column: &ColumnSpec) -> AdapterResult<String> {
    let name = quote_identifier(&column.name)?;
    validate_type_token(&column.column_type)?;
    let mut definition = format!("{} {}", name, column.column_type.trim().to_uppercase());
    if column.not_null {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        validate_expression(default)?;
        definition.push_str(" DEFAULT ");
        definition.push_str(default);
    }
    Ok(definition)
}

fn foreign_key_clause(
    table: &str,
    foreign_key: &ForeignKeyRef,
    index: Option<usize>,
) -> AdapterResult<String> {
    let column = quote_identifier(&foreign_key.column)?;
    let reference_table = quote_identifier(&foreign_key.reference_table)?;
    let reference_column = quote_identifier(&foreign_key.reference_column)?;
    let constraint = match &foreign_key.constraint_name {
        Some(name) => quote_identifier(name)?,
        None => escape_identifier(&default_constraint_name(table, &foreign_key.column, index)),
    };
    Ok(format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
        constraint, column, reference_table, reference_column
    ))
}

/// `fk_<table>_<column>[_<index>]`.
///
/// Names longer than [`MAX_IDENTIFIER_LEN`] keep the index suffix and swap
/// the tail of the prefix for a short digest of the table and column.
pub fn default_constraint_name(table: &str, column: &str, index: Option<usize>) -> String {
    let suffix = index.map(|i| format!("_{}", i)).unwrap_or_default();
    let prefix = format!("fk_{}_{}", table, column);
    if prefix.len() + suffix.len() <= MAX_IDENTIFIER_LEN {
        return format!("{}{}", prefix, suffix);
    }

    let digest = Sha256::digest(format!("{}.{}", table, column).as_bytes());
    let tag = hex::encode(&digest[..4]);
    let mut keep = MAX_IDENTIFIER_LEN - suffix.len() - tag.len() - 1;
    while !prefix.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}_{}{}", &prefix[..keep], tag, suffix)
}

/// `CREATE TABLE IF NOT EXISTS` with inline named foreign keys.
///
/// Incomplete foreign keys are skipped but keep their position, so index
/// suffixes always match the caller's list.
pub fn create_table(
    table: &str,
    columns: &[ColumnSpec],
    foreign_keys: &[ForeignKeyRef],
) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    if columns.is_empty() {
        return Err(AdapterError::validation(format!(
            "Table '{}' needs at least one column",
            table
        )));
    }

    let mut definitions = columns
        .iter()
        .map(column_definition)
        .collect::<AdapterResult<Vec<_>>>()?;

    for (index, foreign_key) in foreign_keys.iter().enumerate() {
        if !foreign_key.is_complete() {
            continue;
        }
        definitions.push(foreign_key_clause(table, foreign_key, Some(index))?);
    }

    Ok(SqlStatement::ddl(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quoted,
        definitions.join(", ")
    )))
}

pub fn drop_table(table: &str) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "DROP TABLE IF EXISTS {}",
        quote_identifier(table)?
    )))
}

/// Multi-row `INSERT ... RETURNING *`.
///
/// Columns come from the first row. Row `r`, column `c` binds parameter
/// `r * columns + c + 1`; keys missing from later rows bind NULL.
pub fn insert(table: &str, rows: &[Record]) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    let Some(first) = rows.first() else {
        return Err(AdapterError::validation("insert requires at least one record"));
    };

    if first.is_empty() {
        if rows.len() > 1 {
            return Err(AdapterError::validation(
                "bulk insert rows must name at least one column",
            ));
        }
        return Ok(SqlStatement::new(
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted),
            Vec::new(),
        ));
    }

    let columns: Vec<&String> = first.keys().collect();
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<AdapterResult<Vec<_>>>()?
        .join(", ");

    let width = columns.len();
    let mut params = Vec::with_capacity(rows.len() * width);
    let mut tuples = Vec::with_capacity(rows.len());
    for (r, row) in rows.iter().enumerate() {
        let placeholders = columns
            .iter()
            .enumerate()
            .map(|(c, column)| column_param(&quoted, column, r * width + c + 1))
            .collect::<AdapterResult<Vec<_>>>()?;
        tuples.push(format!("({})", placeholders.join(", ")));
        params.extend(
            columns
                .iter()
                .map(|c| row.get(c.as_str()).cloned().unwrap_or(Value::Null)),
        );
    }

    Ok(SqlStatement::new(
        format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING *",
            quoted,
            column_list,
            tuples.join(", ")
        ),
        params,
    ))
}

/// `"a" = <param $start> AND "b" = <param $start+1> ...`, each through [`column_param`]
fn equality_conjunction(
    quoted_table: &str,
    filters: &Filters,
    start: usize,
) -> AdapterResult<(String, Vec<Value>)> {
    let mut terms = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());
    for (offset, (column, value)) in filters.iter().enumerate() {
        terms.push(format!(
            "{} = {}",
            quote_identifier(column)?,
            column_param(quoted_table, column, start + offset)?
        ));
        params.push(value.clone());
    }
    Ok((terms.join(" AND "), params))
}

/// `SELECT *` with equality filters in iteration order and an optional limit
pub fn select(table: &str, filters: &Filters, limit: Option<i64>) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    let mut sql = format!("SELECT * FROM {}", quoted);
    let (conditions, params) = equality_conjunction(&quoted, filters, 1)?;
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions);
    }
    if let Some(limit) = limit.filter(|n| *n > 0) {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok(SqlStatement::new(sql, params))
}

/// `UPDATE ... SET ... WHERE id_column = $n RETURNING *`
pub fn update(
    table: &str,
    id: &Value,
    updates: &Record,
    id_column: &str,
) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    let key = quote_identifier(id_column)?;
    if updates.is_empty() {
        return Err(AdapterError::validation("update requires at least one field"));
    }

    let mut assignments = Vec::with_capacity(updates.len());
    let mut params = Vec::with_capacity(updates.len() + 1);
    for (i, (column, value)) in updates.iter().enumerate() {
        assignments.push(format!(
            "{} = {}",
            quote_identifier(column)?,
            column_param(&quoted, column, i + 1)?
        ));
        params.push(value.clone());
    }
    params.push(id.clone());

    Ok(SqlStatement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING *",
            quoted,
            assignments.join(", "),
            key,
            column_param(&quoted, id_column, params.len())?
        ),
        params,
    ))
}

/// `DELETE FROM ... WHERE id_column = <column_param> RETURNING *`
pub fn delete(table: &str, id: &Value, id_column: &str) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    Ok(SqlStatement::new(
        format!(
            "DELETE FROM {} WHERE {} = {} RETURNING *",
            quoted,
            quote_identifier(id_column)?,
            column_param(&quoted, id_column, 1)?
        ),
        vec![id.clone()],
    ))
}

pub fn add_column(table: &str, column: &ColumnSpec) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_identifier(table)?,
        column_definition(column)?
    )))
}

pub fn drop_column(table: &str, column: &str) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_identifier(table)?,
        quote_identifier(column)?
    )))
}

/// Standalone constraint; the default name carries no index suffix
pub fn add_foreign_key(table: &str, foreign_key: &ForeignKeyRef) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    if !foreign_key.is_complete() {
        return Err(AdapterError::validation(
            "foreign key requires column, referenceTable and referenceColumn",
        ));
    }
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} ADD {}",
        quoted,
        foreign_key_clause(table, foreign_key, None)?
    )))
}

pub fn drop_foreign_key(table: &str, constraint_name: &str) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_identifier(table)?,
        quote_identifier(constraint_name)?
    )))
}

pub fn enable_realtime(table: &str) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} REPLICA IDENTITY FULL",
        quote_identifier(table)?
    )))
}

pub fn set_row_level_security(table: &str, enabled: bool) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "ALTER TABLE {} {} ROW LEVEL SECURITY",
        quote_identifier(table)?,
        if enabled { "ENABLE" } else { "DISABLE" }
    )))
}

/// `CREATE POLICY ... FOR <op> USING (<condition>)`
pub fn create_policy(
    table: &str,
    policy_name: &str,
    operation: &str,
    condition: &str,
) -> AdapterResult<SqlStatement> {
    let quoted = quote_identifier(table)?;
    let policy = quote_identifier(policy_name)?;
    let operation = validate_policy_operation(operation)?;
    validate_expression(condition)?;
    let clause = if operation == "INSERT" { "WITH CHECK" } else { "USING" };
    Ok(SqlStatement::ddl(format!(
        "CREATE POLICY {} ON {} FOR {} {} ({})",
        policy, quoted, operation, clause, condition
    )))
}

pub fn drop_policy(table: &str, policy_name: &str) -> AdapterResult<SqlStatement> {
    Ok(SqlStatement::ddl(format!(
        "DROP POLICY IF EXISTS {} ON {}",
        quote_identifier(policy_name)?,
        quote_identifier(table)?
    )))
}

/// Catalog query listing `public` tables and views
pub const TABLES_QUERY: &str = "SELECT table_name::text AS table_name, table_type::text AS table_type \
     FROM information_schema.tables \
     WHERE table_schema = 'public' \
     ORDER BY table_name";

/// Catalog query for one table's columns, in ordinal order
pub const COLUMNS_QUERY: &str = "SELECT column_name::text AS column_name, \
            data_type::text AS data_type, \
            is_nullable::text AS is_nullable, \
            column_default::text AS column_default, \
            character_maximum_length::int4 AS max_length, \
            numeric_precision::int4 AS numeric_precision, \
            numeric_scale::int4 AS numeric_scale \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

/// Catalog query for one table's outgoing foreign keys
pub const FOREIGN_KEYS_QUERY: &str = "SELECT tc.constraint_name::text AS constraint_name, \
            kcu.column_name::text AS column_name, \
            ccu.table_name::text AS reference_table, \
            ccu.column_name::text AS reference_column \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public' AND tc.table_name = $1 \
     ORDER BY tc.constraint_name";

/// Row-level security flag for one `public` table
pub const RLS_QUERY: &str = "SELECT c.relrowsecurity \
     FROM pg_catalog.pg_class c \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = 'public' AND c.relname = $1";

/// Policies attached to one `public` table
pub const POLICIES_QUERY: &str = "SELECT policyname::text AS name, cmd::text AS command, \
            qual::text AS condition, with_check::text AS check_expression \
     FROM pg_catalog.pg_policies \
     WHERE schemaname = 'public' AND tablename = $1 \
     ORDER BY policyname";
