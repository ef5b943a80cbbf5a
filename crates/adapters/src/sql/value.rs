//! JSON to PostgreSQL parameter binding
//!
//! Every parameter travels as `jsonb`. Builders wrap each placeholder with
//! [`column_param`](super::builder::column_param), which reads the value
//! through the target column's own input function, so the column type
//! decides how `"5"`, `"2024-01-01"` or a UUID-looking string is parsed.

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgTypeInfo};
use sqlx::{Postgres, Type};

pub(crate) type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Type every statement parameter is declared with
pub fn parameter_type() -> PgTypeInfo {
    <JsonValue as Type<Postgres>>::type_info()
}

/// Bind every JSON parameter of a statement in order
pub(crate) fn bind_all<'q>(mut query: PgQuery<'q>, params: &[JsonValue]) -> PgQuery<'q> {
    for param in params {
        query = query.bind(param.clone());
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::TypeInfo;

    #[test]
    fn test_parameters_are_declared_jsonb() {
        assert_eq!(parameter_type().name(), "JSONB");
        assert_eq!(parameter_type(), PgTypeInfo::with_name("jsonb"));
    }
}
