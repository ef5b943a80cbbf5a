//! Value shapes crossing the adapter boundary

use crate::error::{AdapterError, AdapterResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A row or document: field name to JSON value, in insertion order
pub type Record = serde_json::Map<String, Value>;

/// Equality-only conjunction of `field = value` terms
pub type Filters = serde_json::Map<String, Value>;

pub(crate) const DATA_INSERTED: &str = "Data inserted successfully";
pub(crate) const RECORD_UPDATED: &str = "Record updated successfully";
pub(crate) const RECORD_DELETED: &str = "Record deleted successfully";
pub(crate) const NOT_FOUND_UPDATE: &str = "No record found to update.";
pub(crate) const NOT_FOUND_DELETE: &str = "No record found to delete.";

/// Column definition, used both as creation input and as introspection output
///
/// Every field is always present; each backend reads only what it understands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default, alias = "required")]
    pub not_null: bool,
    #[serde(default, deserialize_with = "deserialize_default_value")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub max_length: Option<i32>,
    #[serde(default)]
    pub precision: Option<i32>,
    #[serde(default)]
    pub scale: Option<i32>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            ..Default::default()
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Defaults arrive from JSON callers as strings, numbers or booleans
fn deserialize_default_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Reference from `column` to `reference_table.reference_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyRef {
    pub column: String,
    pub reference_table: String,
    pub reference_column: String,
    #[serde(default)]
    pub constraint_name: Option<String>,
}

impl ForeignKeyRef {
    pub fn new(
        column: impl Into<String>,
        reference_table: impl Into<String>,
        reference_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            reference_table: reference_table.into(),
            reference_column: reference_column.into(),
            constraint_name: None,
        }
    }

    pub fn named(mut self, constraint_name: impl Into<String>) -> Self {
        self.constraint_name = Some(constraint_name.into());
        self
    }

    pub(crate) fn is_complete(&self) -> bool {
        !self.column.is_empty()
            && !self.reference_table.is_empty()
            && !self.reference_column.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
    Collection,
}

/// Row-level security state reported by the Supabase adapter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSecurity {
    pub realtime: bool,
    pub rls_enabled: bool,
    pub policies: Vec<PolicyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    pub name: String,
    pub command: String,
    pub condition: Option<String>,
    pub check: Option<String>,
}

/// Schema introspection result for one table or collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TableKind,
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<TableSecurity>,
}

impl TableDescriptor {
    pub fn collection(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Collection,
            columns,
            foreign_keys: Vec::new(),
            security: None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Insert payload: one record or a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertData {
    Many(Vec<Record>),
    One(Record),
}

impl InsertData {
    /// Flatten into rows, rejecting an empty batch
    pub fn into_records(self) -> AdapterResult<Vec<Record>> {
        match self {
            InsertData::One(record) => Ok(vec![record]),
            InsertData::Many(records) if records.is_empty() => Err(AdapterError::validation(
                "insert requires at least one record",
            )),
            InsertData::Many(records) => Ok(records),
        }
    }
}

impl From<Record> for InsertData {
    fn from(record: Record) -> Self {
        InsertData::One(record)
    }
}

impl From<Vec<Record>> for InsertData {
    fn from(records: Vec<Record>) -> Self {
        InsertData::Many(records)
    }
}

impl TryFrom<Value> for InsertData {
    type Error = AdapterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(record) => Ok(InsertData::One(record)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(AdapterError::validation(
                        "every inserted value must be an object",
                    )),
                })
                .collect::<AdapterResult<Vec<_>>>()
                .map(InsertData::Many),
            _ => Err(AdapterError::validation(
                "insert values must be an object or an array of objects",
            )),
        }
    }
}

/// Normalized operation result
///
/// `success: false` is the "not found" outcome of update and delete; real
/// failures are returned as [`AdapterError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> AdapterResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl AdapterResponse<()> {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

pub type MessageResponse = AdapterResponse<()>;
pub type RowsResponse = AdapterResponse<Vec<Record>>;
pub type RecordResponse = AdapterResponse<Record>;
pub type SchemaResponse = AdapterResponse<Vec<TableDescriptor>>;

/// Positive limits cap results; anything else means the backend default
pub fn effective_limit(limit: Option<i64>) -> Option<i64> {
    limit.filter(|n| *n > 0)
}

/// Render an id for backends that address records by string key
pub(crate) fn id_to_string(id: &Value) -> AdapterResult<String> {
    match id {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(AdapterError::validation(format!(
            "record id must be a non-empty string or a number, got {}",
            id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_spec_accepts_metadata_shape() {
        let column: ColumnSpec = serde_json::from_value(json!({
            "name": "age",
            "type": "Number",
            "required": true,
            "defaultValue": 0
        }))
        .unwrap();
        assert!(column.not_null);
        assert_eq!(column.default_value.as_deref(), Some("0"));
        assert_eq!(column.max_length, None);
    }

    #[test]
    fn test_column_spec_serializes_every_field() {
        let value = serde_json::to_value(ColumnSpec::new("id", "SERIAL")).unwrap();
        let object = value.as_object().unwrap();
        for key in [
            "name",
            "type",
            "notNull",
            "defaultValue",
            "nullable",
            "maxLength",
            "precision",
            "scale",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_insert_data_shapes() {
        let one = InsertData::try_from(json!({"name": "a"})).unwrap();
        assert_eq!(one.into_records().unwrap().len(), 1);

        let many: InsertData = serde_json::from_value(json!([{"a": 1}, {"a": 2}])).unwrap();
        assert!(matches!(many, InsertData::Many(ref rows) if rows.len() == 2));

        assert!(InsertData::Many(vec![]).into_records().is_err());
        assert!(InsertData::try_from(json!([1, 2])).is_err());
        assert!(InsertData::try_from(json!("text")).is_err());
    }

    #[test]
    fn test_response_serialization_omits_absent_fields() {
        let response = MessageResponse::done("Table 'users' created successfully.");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "message": "Table 'users' created successfully."})
        );

        let missing = RecordResponse::not_found(NOT_FOUND_UPDATE);
        assert!(!missing.success);
        assert!(missing.data.is_none());
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(Some(10)), Some(10));
        assert_eq!(effective_limit(Some(0)), None);
        assert_eq!(effective_limit(Some(-5)), None);
        assert_eq!(effective_limit(None), None);
    }

    #[test]
    fn test_id_to_string() {
        assert_eq!(id_to_string(&json!("abc")).unwrap(), "abc");
        assert_eq!(id_to_string(&json!(42)).unwrap(), "42");
        assert!(id_to_string(&json!(null)).is_err());
        assert!(id_to_string(&json!("")).is_err());
    }
}
