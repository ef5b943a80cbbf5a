//! Per-collection field models
//!
//! A model is bound the first time a collection is touched, either from a
//! declared column list (`create_table`) or inferred from the first record
//! written. Models are lenient: fields they do not name pass through.

use super::convert::json_to_bson;
use crate::error::{AdapterError, AdapterResult};
use crate::inference::FieldKind;
use crate::types::{ColumnSpec, ForeignKeyRef, Record};
use chrono::DateTime as ChronoDateTime;
use mongodb::bson::{oid::ObjectId, Bson, DateTime, Document};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<String>,
    /// Referenced collection for ObjectId reference fields
    pub reference: Option<String>,
}

impl FieldSpec {
    fn inferred(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            reference: None,
        }
    }

    fn default_value(&self) -> Option<Bson> {
        let raw = self.default.as_deref()?;
        if self.kind == FieldKind::Date && raw.eq_ignore_ascii_case("NOW()") {
            return Some(Bson::DateTime(DateTime::now()));
        }
        Some(self.cast(&Value::String(raw.to_string())))
    }

    /// Convert to the declared kind when no information is lost; otherwise
    /// keep the value as given
    pub fn cast(&self, value: &Value) -> Bson {
        match (self.kind, value) {
            (FieldKind::String, Value::Number(n)) => Bson::String(n.to_string()),
            (FieldKind::String, Value::Bool(b)) => Bson::String(b.to_string()),
            (FieldKind::Number, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => json_to_bson(&Value::from(i)),
                Err(_) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map_or_else(|| Bson::String(s.clone()), Bson::Double),
            },
            (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Bson::Boolean(true),
                "false" => Bson::Boolean(false),
                _ => Bson::String(s.clone()),
            },
            (FieldKind::Date, Value::String(s)) => ChronoDateTime::parse_from_rfc3339(s)
                .map(|dt| Bson::DateTime(DateTime::from_millis(dt.timestamp_millis())))
                .unwrap_or_else(|_| Bson::String(s.clone())),
            (FieldKind::Date, Value::Number(n)) => match n.as_i64() {
                Some(ms) => Bson::DateTime(DateTime::from_millis(ms)),
                None => json_to_bson(value),
            },
            (FieldKind::ObjectId, Value::String(s)) => object_id_or_string(s),
            _ => json_to_bson(value),
        }
    }
}

/// 24-hex strings become ObjectIds; anything else stays a string
pub fn object_id_or_string(s: &str) -> Bson {
    ObjectId::parse_str(s).map_or_else(|_| Bson::String(s.to_string()), Bson::ObjectId)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionModel {
    fields: BTreeMap<String, FieldSpec>,
}

impl CollectionModel {
    /// Field kinds read off a sample record; no sample gives an empty model
    pub fn infer(sample: Option<&Record>) -> Self {
        let fields = sample
            .into_iter()
            .flat_map(|record| record.iter())
            .map(|(name, value)| (name.clone(), FieldSpec::inferred(FieldKind::of_json(value))))
            .collect();
        Self { fields }
    }

    /// Declared columns; foreign key columns become ObjectId references
    pub fn declared(columns: &[ColumnSpec], foreign_keys: &[ForeignKeyRef]) -> Self {
        let mut fields: BTreeMap<String, FieldSpec> = columns
            .iter()
            .map(|column| {
                let kind = FieldKind::from_type_token(&column.column_type);
                let spec = FieldSpec {
                    kind,
                    required: column.not_null,
                    default: column.default_value.clone(),
                    reference: None,
                };
                (column.name.clone(), spec)
            })
            .collect();

        for foreign_key in foreign_keys {
            if let Some(spec) = fields.get_mut(&foreign_key.column) {
                spec.kind = FieldKind::ObjectId;
                spec.default = None;
                spec.reference = Some(foreign_key.reference_table.clone());
            }
        }
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn remove_field(&mut self, name: &str) {
        self.fields.remove(name);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Cast one value for `field`; `_id` and reference fields try ObjectId
    pub fn cast_value(&self, field: &str, value: &Value) -> Bson {
        match (field, value) {
            ("_id", Value::String(s)) => object_id_or_string(s),
            _ => match self.fields.get(field) {
                Some(spec) => spec.cast(value),
                None => json_to_bson(value),
            },
        }
    }

    /// Cast each field of a partial record without defaults or requirements
    pub fn cast_fields(&self, record: &Record) -> Document {
        record
            .iter()
            .map(|(name, value)| (name.clone(), self.cast_value(name, value)))
            .collect()
    }

    /// Build the document to insert: cast, fill defaults, enforce required
    pub fn apply(&self, collection: &str, record: &Record) -> AdapterResult<Document> {
        let mut document = self.cast_fields(record);

        for (name, spec) in &self.fields {
            let missing = matches!(document.get(name), None | Some(Bson::Null));
            if !missing {
                continue;
            }
            if let Some(value) = spec.default_value() {
                document.insert(name.clone(), value);
            } else if spec.required {
                return Err(AdapterError::validation(format!(
                    "{} validation failed: {}: Path `{}` is required.",
                    collection, name, name
                )));
            }
        }
        Ok(document)
    }
}
