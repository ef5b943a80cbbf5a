//! JSON and BSON conversion at the MongoDB boundary.

use crate::inference::FieldKind;
use crate::types::Record;
use mongodb::bson::{Bson, Document};
use serde_json::{Number, Value};

pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32),
            None => Bson::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(record_to_document(map)),
    }
}

pub fn record_to_document(record: &Record) -> Document {
    record
        .iter()
        .map(|(k, v)| (k.clone(), json_to_bson(v)))
        .collect()
}

/// Output form: ObjectIds as hex strings, dates as RFC 3339
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(d) => Number::from_f64(d).map_or(Value::Null, Value::Number),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map_or_else(|_| Value::from(dt.timestamp_millis()), Value::String),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(document_to_record(doc)),
        other => other.into_relaxed_extjson(),
    }
}

pub fn document_to_record(document: Document) -> Record {
    document
        .into_iter()
        .map(|(k, v)| (k, bson_to_json(v)))
        .collect()
}

pub fn bson_kind(value: &Bson) -> FieldKind {
    match value {
        Bson::String(_) => FieldKind::String,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
            FieldKind::Number
        }
        Bson::Boolean(_) => FieldKind::Boolean,
        Bson::DateTime(_) | Bson::Timestamp(_) => FieldKind::Date,
        Bson::Array(_) => FieldKind::Array,
        Bson::ObjectId(_) => FieldKind::ObjectId,
        Bson::Document(_) => FieldKind::Object,
        _ => FieldKind::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime};
    use serde_json::json;

    #[test]
    fn test_numbers_pick_narrowest_integer() {
        assert_eq!(json_to_bson(&json!(5)), Bson::Int32(5));
        assert_eq!(json_to_bson(&json!(5_000_000_000_i64)), Bson::Int64(5_000_000_000));
        assert_eq!(json_to_bson(&json!(2.5)), Bson::Double(2.5));
    }

    #[test]
    fn test_output_document() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        let record = document_to_record(doc! {
            "_id": oid,
            "at": DateTime::from_millis(0),
            "tags": ["a", 1],
            "nested": { "ok": true },
        });
        assert_eq!(record["_id"], json!("507f1f77bcf86cd799439011"));
        assert_eq!(record["at"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(record["tags"], json!(["a", 1]));
        assert_eq!(record["nested"], json!({"ok": true}));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(bson_kind(&Bson::ObjectId(ObjectId::new())), FieldKind::ObjectId);
        assert_eq!(bson_kind(&Bson::DateTime(DateTime::now())), FieldKind::Date);
        assert_eq!(bson_kind(&Bson::Null), FieldKind::Mixed);
    }
}
