use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Print a response as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a JSON command-line argument
pub fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON: {}", what, raw))
}

/// Parse a JSON object argument; absent means empty
pub fn parse_object(raw: Option<&str>, what: &str) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match parse_json(raw, what)? {
            Value::Object(map) => Ok(map),
            other => bail!("{} must be a JSON object, got {}", what, other),
        },
    }
}

/// Record ids: numbers stay numbers, anything else is a string
pub fn parse_id(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Number(_)) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), json!(42));
        assert_eq!(parse_id("507f1f77bcf86cd799439011"), json!("507f1f77bcf86cd799439011"));
        assert_eq!(parse_id("\"quoted\""), json!("\"quoted\""));
    }

    #[test]
    fn test_parse_object() {
        assert!(parse_object(None, "filter").unwrap().is_empty());
        let filter = parse_object(Some(r#"{"status": "active"}"#), "filter").unwrap();
        assert_eq!(filter["status"], json!("active"));
        assert!(parse_object(Some("[1]"), "filter").is_err());
        assert!(parse_object(Some("{"), "filter").is_err());
    }
}
