//! Identifier and expression validation
//!
//! This module provides functions for:
//! - Escaping SQL identifiers (table, column, constraint and policy names)
//! - Validating caller-supplied identifiers before interpolation
//! - Checking type tokens and free-form expressions (defaults, policy conditions)
//! - Validating document-store collection and field names

use crate::error::{AdapterError, AdapterResult};

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// PostgreSQL truncates identifiers longer than this
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Patterns rejected inside default values and policy conditions
const DANGEROUS_PATTERNS: &[&str] = &[
    ";",
    "--",
    "/*",
    "*/",
    "UNION SELECT",
    "UNION ALL SELECT",
    "PG_SLEEP",
    "PG_READ_FILE",
    "PG_READ_BINARY_FILE",
    "LO_IMPORT",
    "LO_EXPORT",
    "DBLINK",
    "COPY ",
];

/// Row-level security policy commands
const POLICY_OPERATIONS: &[&str] = &["ALL", "SELECT", "INSERT", "UPDATE", "DELETE"];

/// Escape a SQL identifier by doubling embedded quotes and wrapping it in
/// double quotes.
///
/// ```
/// use omnidb_adapters::security::escape_identifier;
///
/// assert_eq!(escape_identifier("user_table"), "\"user_table\"");
/// assert_eq!(escape_identifier("table\"name"), "\"table\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> AdapterResult<()> {
    let Some(first) = identifier.chars().next() else {
        return Err(AdapterError::validation("Identifier cannot be empty"));
    };

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(AdapterError::validation(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LENGTH
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(AdapterError::validation(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() || first == '$' {
        return Err(AdapterError::validation(format!(
            "Identifier '{}' must start with a letter or underscore",
            identifier
        )));
    }

    Ok(())
}

/// Validate and escape in one step
pub fn quote_identifier(identifier: &str) -> AdapterResult<String> {
    validate_identifier(identifier)?;
    Ok(escape_identifier(identifier))
}

/// Validate a column type token such as `VARCHAR(255)`, `NUMERIC(10, 2)`,
/// `TIMESTAMP WITH TIME ZONE` or `INTEGER[]`
pub fn validate_type_token(token: &str) -> AdapterResult<()> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(AdapterError::validation("Column type cannot be empty"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || " _(),[]".contains(c);
    if let Some(c) = trimmed.chars().find(|c| !allowed(*c)) {
        return Err(AdapterError::validation(format!(
            "Column type '{}' contains invalid character '{}'",
            token, c
        )));
    }
    if !trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(AdapterError::validation(format!(
            "Column type '{}' must start with a letter",
            token
        )));
    }
    Ok(())
}

/// Validate a free-form SQL expression (column default or policy condition)
pub fn validate_expression(expression: &str) -> AdapterResult<()> {
    if expression.trim().is_empty() {
        return Err(AdapterError::validation("Expression cannot be empty"));
    }
    let upper = expression.to_uppercase();
    for pattern in DANGEROUS_PATTERNS {
        if upper.contains(pattern) {
            return Err(AdapterError::validation(format!(
                "Expression contains potentially dangerous pattern: {}",
                pattern.trim()
            )));
        }
    }
    Ok(())
}

/// Normalize a policy command, rejecting anything outside the fixed set
pub fn validate_policy_operation(operation: &str) -> AdapterResult<&'static str> {
    let upper = operation.trim().to_uppercase();
    POLICY_OPERATIONS
        .iter()
        .copied()
        .find(|op| *op == upper)
        .ok_or_else(|| {
            AdapterError::validation(format!(
                "Policy operation '{}' must be one of {}",
                operation,
                POLICY_OPERATIONS.join(", ")
            ))
        })
}

/// Validate a collection name for the document stores.
///
/// Names end up in REST paths and driver namespaces, so path separators,
/// NUL bytes, `$` and reserved `__name__` forms are rejected.
pub fn validate_collection_name(name: &str) -> AdapterResult<()> {
    if name.is_empty() {
        return Err(AdapterError::validation("Collection name cannot be empty"));
    }
    if name.len() > 255 {
        return Err(AdapterError::validation(format!(
            "Collection name '{}' is too long (max 255 bytes)",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(AdapterError::validation(format!(
            "Collection name '{}' is reserved",
            name
        )));
    }
    if name.starts_with("__") && name.ends_with("__") {
        return Err(AdapterError::validation(format!(
            "Collection name '{}' uses a reserved form",
            name
        )));
    }
    if name.starts_with("system.") {
        return Err(AdapterError::validation(format!(
            "Collection name '{}' is in the reserved system namespace",
            name
        )));
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\0' | '$')) {
        return Err(AdapterError::validation(format!(
            "Collection name '{}' contains invalid character '{}'",
            name,
            c.escape_default()
        )));
    }
    Ok(())
}

/// Validate a caller-supplied document id.
///
/// Ids become one REST path segment: a `/` would address another
/// collection, and `.`/`..` are dropped when the URL is normalized.
pub fn validate_document_id(id: &str) -> AdapterResult<()> {
    if id.is_empty() {
        return Err(AdapterError::validation("Document id cannot be empty"));
    }
    if id.len() > 1500 {
        return Err(AdapterError::validation(
            "Document id is too long (max 1500 bytes)",
        ));
    }
    if id == "." || id == ".." || (id.len() >= 4 && id.starts_with("__") && id.ends_with("__")) {
        return Err(AdapterError::validation(format!(
            "Document id '{}' is reserved",
            id
        )));
    }
    if let Some(c) = id.chars().find(|c| matches!(c, '/' | '\0')) {
        return Err(AdapterError::validation(format!(
            "Document id '{}' contains invalid character '{}'",
            id.escape_default(),
            c.escape_default()
        )));
    }
    Ok(())
}

/// Validate a document field name used in a filter or schema change.
///
/// Operator-looking names (`$where`, `$gt`...) are rejected so equality
/// filters cannot smuggle query operators.
pub fn validate_field_name(name: &str) -> AdapterResult<()> {
    if name.is_empty() {
        return Err(AdapterError::validation("Field name cannot be empty"));
    }
    if name.starts_with('$') || name.contains('\0') {
        return Err(AdapterError::validation(format!(
            "Field name '{}' is not allowed",
            name.escape_default()
        )));
    }
    Ok(())
}
