//! Column shape inference for schemaless collections
//!
//! Document stores have no catalog, so their schema is read off one sample
//! document. The result reflects only the fields that sample carries.

use crate::types::ColumnSpec;

/// Field type names reported for document collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    ObjectId,
    Mixed,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "String",
            FieldKind::Number => "Number",
            FieldKind::Boolean => "Boolean",
            FieldKind::Date => "Date",
            FieldKind::Array => "Array",
            FieldKind::Object => "Object",
            FieldKind::ObjectId => "ObjectId",
            FieldKind::Mixed => "Mixed",
        }
    }

    /// Map a caller's column type token (`VARCHAR(255)`, `int`, `Date`...)
    /// onto a document field kind. Unknown tokens become `Mixed`.
    pub fn from_type_token(token: &str) -> Self {
        let lower = token.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or_default().trim();
        match base {
            "string" | "text" | "varchar" | "char" | "character varying" | "uuid" => {
                FieldKind::String
            }
            "number" | "integer" | "int" | "int4" | "int8" | "bigint" | "smallint" | "serial"
            | "bigserial" | "float" | "double" | "double precision" | "real" | "numeric"
            | "decimal" => FieldKind::Number,
            "boolean" | "bool" => FieldKind::Boolean,
            "date" | "timestamp" | "timestamptz" | "datetime" => FieldKind::Date,
            "array" => FieldKind::Array,
            "object" | "json" | "jsonb" | "map" => FieldKind::Object,
            "objectid" => FieldKind::ObjectId,
            _ => FieldKind::Mixed,
        }
    }

    /// Kind of a plain JSON value
    pub fn of_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(_) => FieldKind::String,
            Value::Number(_) => FieldKind::Number,
            Value::Bool(_) => FieldKind::Boolean,
            Value::Array(_) => FieldKind::Array,
            Value::Object(_) => FieldKind::Object,
            Value::Null => FieldKind::Mixed,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build inferred columns from `(field, kind)` pairs of a sample document.
///
/// Inferred columns are never required and always nullable.
pub fn infer_columns<I, S>(fields: I) -> Vec<ColumnSpec>
where
    I: IntoIterator<Item = (S, FieldKind)>,
    S: Into<String>,
{
    fields
        .into_iter()
        .map(|(name, kind)| ColumnSpec {
            nullable: Some(true),
            ..ColumnSpec::new(name, kind.as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_tokens() {
        assert_eq!(FieldKind::from_type_token("VARCHAR(255)"), FieldKind::String);
        assert_eq!(FieldKind::from_type_token("integer"), FieldKind::Number);
        assert_eq!(FieldKind::from_type_token("NUMERIC(10, 2)"), FieldKind::Number);
        assert_eq!(FieldKind::from_type_token("bool"), FieldKind::Boolean);
        assert_eq!(FieldKind::from_type_token("TIMESTAMP"), FieldKind::Date);
        assert_eq!(FieldKind::from_type_token("geometry"), FieldKind::Mixed);
    }

    #[test]
    fn test_json_kinds() {
        assert_eq!(FieldKind::of_json(&json!(1)), FieldKind::Number);
        assert_eq!(FieldKind::of_json(&json!(1.5)), FieldKind::Number);
        assert_eq!(FieldKind::of_json(&json!("s")), FieldKind::String);
        assert_eq!(FieldKind::of_json(&json!([1])), FieldKind::Array);
        assert_eq!(FieldKind::of_json(&json!({"a": 1})), FieldKind::Object);
        assert_eq!(FieldKind::of_json(&json!(null)), FieldKind::Mixed);
    }

    #[test]
    fn test_infer_columns_keeps_field_order() {
        let columns = infer_columns([("x", FieldKind::Number), ("y", FieldKind::String)]);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "x");
        assert_eq!(columns[0].column_type, "Number");
        assert_eq!(columns[1].column_type, "String");
        assert!(columns.iter().all(|c| !c.not_null && c.nullable == Some(true)));
    }
}
