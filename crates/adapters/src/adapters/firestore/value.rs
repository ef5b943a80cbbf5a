//! Firestore REST value encoding
//!
//! Documents travel as `{"fields": {"name": {"stringValue": "..."}}}`; this
//! module maps those typed values to and from plain JSON.

use crate::inference::FieldKind;
use crate::types::Record;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Field name to typed value
pub type Fields = BTreeMap<String, FirestoreValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FirestoreValue {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(#[serde(with = "integer_string")] i64),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(GeoPoint),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FirestoreValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: Fields,
}

/// int64 values are strings on the wire; accept bare numbers too
mod integer_string {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        struct IntegerVisitor;

        impl<'de> Visitor<'de> for IntegerVisitor {
            type Value = i64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an int64 as a string or number")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
                i64::try_from(v).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IntegerVisitor)
    }
}

impl FirestoreValue {
    pub fn now() -> Self {
        FirestoreValue::TimestampValue(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn string(value: impl Into<String>) -> Self {
        FirestoreValue::StringValue(value.into())
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FirestoreValue::NullValue(()),
            Value::Bool(b) => FirestoreValue::BooleanValue(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FirestoreValue::IntegerValue(i),
                None => FirestoreValue::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FirestoreValue::StringValue(s.clone()),
            Value::Array(items) => FirestoreValue::ArrayValue(ArrayValue {
                values: items.iter().map(Self::from_json).collect(),
            }),
            Value::Object(map) => FirestoreValue::MapValue(MapValue {
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            }),
        }
    }

    /// Timestamps and references become strings, geo points objects
    pub fn to_json(&self) -> Value {
        match self {
            FirestoreValue::NullValue(()) => Value::Null,
            FirestoreValue::BooleanValue(b) => Value::Bool(*b),
            FirestoreValue::IntegerValue(i) => Value::from(*i),
            FirestoreValue::DoubleValue(d) => {
                Number::from_f64(*d).map_or(Value::Null, Value::Number)
            }
            FirestoreValue::TimestampValue(s)
            | FirestoreValue::StringValue(s)
            | FirestoreValue::BytesValue(s)
            | FirestoreValue::ReferenceValue(s) => Value::String(s.clone()),
            FirestoreValue::GeoPointValue(point) => serde_json::json!({
                "latitude": point.latitude,
                "longitude": point.longitude,
            }),
            FirestoreValue::ArrayValue(array) => {
                Value::Array(array.values.iter().map(Self::to_json).collect())
            }
            FirestoreValue::MapValue(map) => Value::Object(fields_to_record(&map.fields)),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FirestoreValue::NullValue(()) => FieldKind::Mixed,
            FirestoreValue::BooleanValue(_) => FieldKind::Boolean,
            FirestoreValue::IntegerValue(_) | FirestoreValue::DoubleValue(_) => FieldKind::Number,
            FirestoreValue::TimestampValue(_) => FieldKind::Date,
            FirestoreValue::StringValue(_) | FirestoreValue::BytesValue(_) => FieldKind::String,
            FirestoreValue::ReferenceValue(_)
            | FirestoreValue::GeoPointValue(_)
            | FirestoreValue::MapValue(_) => FieldKind::Object,
            FirestoreValue::ArrayValue(_) => FieldKind::Array,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FirestoreValue::StringValue(s) => Some(s),
            _ => None,
        }
    }
}

pub fn record_to_fields(record: &Record) -> Fields {
    record
        .iter()
        .map(|(k, v)| (k.clone(), FirestoreValue::from_json(v)))
        .collect()
}

pub fn fields_to_record(fields: &Fields) -> Record {
    fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let value = FirestoreValue::from_json(&json!({"n": 5, "tags": ["a"], "none": null}));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"mapValue": {"fields": {
                "n": {"integerValue": "5"},
                "none": {"nullValue": null},
                "tags": {"arrayValue": {"values": [{"stringValue": "a"}]}}
            }}})
        );
    }

    #[test]
    fn test_decode_server_values() {
        let decoded: Fields = serde_json::from_value(json!({
            "count": {"integerValue": "42"},
            "ratio": {"doubleValue": 0.5},
            "seen": {"timestampValue": "2024-01-01T00:00:00Z"},
            "empty": {"arrayValue": {}},
            "nested": {"mapValue": {}},
            "where": {"geoPointValue": {"latitude": 1.5, "longitude": 2.0}}
        }))
        .unwrap();

        let record = fields_to_record(&decoded);
        assert_eq!(record["count"], json!(42));
        assert_eq!(record["ratio"], json!(0.5));
        assert_eq!(record["seen"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(record["empty"], json!([]));
        assert_eq!(record["nested"], json!({}));
        assert_eq!(record["where"], json!({"latitude": 1.5, "longitude": 2.0}));
        assert_eq!(decoded["seen"].kind(), FieldKind::Date);
        assert_eq!(decoded["count"].kind(), FieldKind::Number);
    }

    #[test]
    fn test_integer_accepts_bare_number() {
        let value: FirestoreValue = serde_json::from_value(json!({"integerValue": 7})).unwrap();
        assert_eq!(value, FirestoreValue::IntegerValue(7));
    }

    #[test]
    fn test_fractional_number_is_double() {
        assert_eq!(
            FirestoreValue::from_json(&json!(1.25)),
            FirestoreValue::DoubleValue(1.25)
        );
    }
}
