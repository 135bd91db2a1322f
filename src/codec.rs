//! Casting between logical column values (`serde_json::Value`) and the values
//! SQLite stores.
//!
//! Outbound casts run before every insert and update and before criteria
//! values are compared, so both sides of a comparison share a representation.
//! Column setters run after the outbound cast and getters after the inbound
//! cast; `raw` skips both.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::schema::ColumnDescriptor;
use crate::sqlite::SqlValue;
use crate::types::{LogicalType, StorageClass};

/// Casts a logical value into the representation stored for `ty`.
pub fn to_column_value(ty: LogicalType, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    match ty.storage() {
        StorageClass::Text => Ok(SqlValue::Text(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        StorageClass::JsonText => Ok(SqlValue::Text(serde_json::to_string(value)?)),
        StorageClass::Numeric | StorageClass::RowId => number_to_sql(value),
        StorageClass::Flag => flag(value).map(SqlValue::from),
        StorageClass::Timestamp => {
            instant(value).map(|at| SqlValue::Integer(at.timestamp_millis()))
        }
    }
}

/// Casts a stored value back into the logical value for `ty`.
pub fn from_column_value(ty: LogicalType, value: SqlValue) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match ty.storage() {
        StorageClass::Text => Ok(Value::String(match value {
            SqlValue::Text(s) => s,
            SqlValue::Integer(n) => n.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
            SqlValue::Null => String::new(),
        })),
        StorageClass::JsonText => match value {
            SqlValue::Text(s) => Ok(serde_json::from_str(&s)?),
            SqlValue::Blob(b) => Ok(serde_json::from_slice(&b)?),
            SqlValue::Integer(n) => Ok(Value::from(n)),
            SqlValue::Real(f) => Ok(real_to_json(f)),
            SqlValue::Null => Ok(Value::Null),
        },
        StorageClass::Numeric | StorageClass::RowId => match value {
            SqlValue::Integer(n) => Ok(Value::from(n)),
            SqlValue::Real(f) => Ok(real_to_json(f)),
            SqlValue::Text(s) => Ok(sql_to_json(number_to_sql(&Value::String(s))?)),
            SqlValue::Blob(_) => Err(Error::codec("cannot read a blob as a number")),
            SqlValue::Null => Ok(Value::Null),
        },
        StorageClass::Flag => match value {
            SqlValue::Integer(n) => Ok(Value::Bool(n != 0)),
            SqlValue::Real(f) => Ok(Value::Bool(f != 0.0)),
            SqlValue::Text(s) => flag(&Value::String(s)).map(Value::Bool),
            SqlValue::Blob(_) => Err(Error::codec("cannot read a blob as a boolean")),
            SqlValue::Null => Ok(Value::Null),
        },
        StorageClass::Timestamp => {
            let at = match value {
                SqlValue::Integer(ms) => from_millis(ms)?,
                SqlValue::Real(ms) => from_millis(ms as i64)?,
                SqlValue::Text(s) => parse_instant(&s)?,
                SqlValue::Blob(_) => return Err(Error::codec("cannot read a blob as a date")),
                SqlValue::Null => return Ok(Value::Null),
            };
            Ok(Value::String(format_instant(at)))
        }
    }
}

/// Untyped cast for values with no declared column type.
pub fn cast_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::from(*b),
        Value::Number(n) => number(n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    })
}

/// Untyped inverse of [`cast_value`].
pub fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::from(n),
        SqlValue::Real(f) => real_to_json(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

/// Outbound cast for a declared column, followed by its setter unless `raw`.
pub fn encode(descriptor: &ColumnDescriptor, value: &Value, raw: bool) -> Result<SqlValue> {
    let cast = to_column_value(descriptor.ty, value)?;
    match descriptor.setter() {
        Some(setter) if !raw => cast_value(&setter(sql_to_json(cast))),
        _ => Ok(cast),
    }
}

/// Inbound cast for a declared column, followed by its getter unless `raw`.
pub fn decode(descriptor: &ColumnDescriptor, value: SqlValue, raw: bool) -> Result<Value> {
    let cast = from_column_value(descriptor.ty, value)?;
    match descriptor.getter() {
        Some(getter) if !raw => Ok(getter(cast)),
        _ => Ok(cast),
    }
}

/// Formats an instant the way date columns are returned.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339, SQLite's `YYYY-MM-DD HH:MM:SS`, a bare date, or a string
/// of epoch milliseconds.
pub fn parse_instant(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }
    if let Ok(ms) = text.parse::<i64>() {
        return from_millis(ms);
    }
    Err(Error::codec(format!("'{text}' is not a recognizable date")))
}

fn instant(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(ms) => from_millis(ms),
            None => from_millis(n.as_f64().unwrap_or(f64::NAN) as i64),
        },
        Value::String(s) => parse_instant(s),
        other => Err(Error::codec(format!("cannot store {other} as a date"))),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::codec(format!("{ms} is out of range for a date")))
}

fn number(n: &Number) -> SqlValue {
    match n.as_i64() {
        Some(i) => SqlValue::Integer(i),
        None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn number_to_sql(value: &Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::from(*b)),
        Value::Number(n) => Ok(number(n)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(SqlValue::Integer(i))
            } else {
                match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(SqlValue::Real(f)),
                    _ => Err(Error::codec(format!("'{s}' is not a number"))),
                }
            }
        }
        other => Err(Error::codec(format!("cannot store {other} as a number"))),
    }
}

fn flag(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(Error::codec(format!("'{other}' is not a boolean"))),
        },
        other => Err(Error::codec(format!("cannot store {other} as a boolean"))),
    }
}

fn real_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn round_trip(ty: LogicalType, value: Value) -> Value {
        let stored = to_column_value(ty, &value).unwrap();
        from_column_value(ty, stored).unwrap()
    }

    #[test]
    fn structured_types_round_trip_through_json_text() {
        let tags = json!(["x", "y"]);
        assert_eq!(
            to_column_value(LogicalType::Array, &tags).unwrap(),
            SqlValue::Text("[\"x\",\"y\"]".into())
        );
        assert_eq!(round_trip(LogicalType::Array, tags.clone()), tags);

        let doc = json!({"a": 1, "nested": {"b": [true, null]}});
        assert_eq!(round_trip(LogicalType::Object, doc.clone()), doc);
        assert_eq!(round_trip(LogicalType::Json, doc.clone()), doc);
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(round_trip(LogicalType::String, json!("hello")), json!("hello"));
        assert_eq!(round_trip(LogicalType::Number, json!(42)), json!(42));
        assert_eq!(round_trip(LogicalType::Number, json!(2.5)), json!(2.5));
        assert_eq!(round_trip(LogicalType::Increments, json!(7)), json!(7));
        assert_eq!(round_trip(LogicalType::Boolean, json!(true)), json!(true));
        assert_eq!(round_trip(LogicalType::Boolean, json!(false)), json!(false));
        assert_eq!(round_trip(LogicalType::Array, Value::Null), Value::Null);
    }

    #[test]
    fn booleans_are_stored_as_zero_or_one() {
        assert_eq!(
            to_column_value(LogicalType::Boolean, &json!(true)).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            to_column_value(LogicalType::Boolean, &json!(0)).unwrap(),
            SqlValue::Integer(0)
        );
        assert!(to_column_value(LogicalType::Boolean, &json!("maybe")).is_err());
    }

    #[test]
    fn strings_stringify_other_values() {
        assert_eq!(
            to_column_value(LogicalType::String, &json!(12)).unwrap(),
            SqlValue::Text("12".into())
        );
        assert_eq!(
            from_column_value(LogicalType::String, SqlValue::Integer(3)).unwrap(),
            json!("3")
        );
    }

    #[test]
    fn numbers_coerce_numeric_strings() {
        assert_eq!(
            to_column_value(LogicalType::Number, &json!(" 15 ")).unwrap(),
            SqlValue::Integer(15)
        );
        assert_eq!(
            to_column_value(LogicalType::Number, &json!("1.25")).unwrap(),
            SqlValue::Real(1.25)
        );
        let err = to_column_value(LogicalType::Number, &json!("abc")).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn dates_round_trip_on_the_instant() {
        let input = json!("2020-01-01T10:30:00+02:00");
        let stored = to_column_value(LogicalType::Date, &input).unwrap();
        assert_eq!(stored, SqlValue::Integer(1_577_867_400_000));

        let back = from_column_value(LogicalType::Date, stored).unwrap();
        assert_eq!(back, json!("2020-01-01T08:30:00.000Z"));
        assert_eq!(
            parse_instant(back.as_str().unwrap()).unwrap(),
            parse_instant(input.as_str().unwrap()).unwrap()
        );
    }

    #[test]
    fn dates_accept_epoch_millis_and_sqlite_text() {
        assert_eq!(
            to_column_value(LogicalType::Date, &json!(0)).unwrap(),
            SqlValue::Integer(0)
        );
        assert_eq!(
            from_column_value(LogicalType::Date, SqlValue::Text("2021-06-01 12:00:00".into()))
                .unwrap(),
            json!("2021-06-01T12:00:00.000Z")
        );
        assert!(to_column_value(LogicalType::Date, &json!("not a date")).is_err());
        assert!(to_column_value(LogicalType::Date, &json!([1])).is_err());
    }

    #[test]
    fn invalid_json_text_is_a_codec_error() {
        let err = from_column_value(LogicalType::Array, SqlValue::Text("[1, 2".into())).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn setter_runs_after_the_cast() {
        let descriptor = ColumnDescriptor::new(LogicalType::Number)
            .with_setter(|v| json!(v.as_i64().unwrap_or_default() * 10));
        // "4" is cast to 4 before the setter sees it.
        assert_eq!(encode(&descriptor, &json!("4"), false).unwrap(), SqlValue::Integer(40));
        assert_eq!(encode(&descriptor, &json!("4"), true).unwrap(), SqlValue::Integer(4));
    }

    #[test]
    fn getter_runs_after_the_cast() {
        let descriptor = ColumnDescriptor::new(LogicalType::Array)
            .with_getter(|v| json!(v.as_array().map(Vec::len).unwrap_or_default()));
        let stored = SqlValue::Text("[1,2,3]".into());
        assert_eq!(decode(&descriptor, stored.clone(), false).unwrap(), json!(3));
        assert_eq!(decode(&descriptor, stored, true).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn untyped_cast() {
        assert_eq!(cast_value(&json!(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(cast_value(&json!({"a": 1})).unwrap(), SqlValue::Text("{\"a\":1}".into()));
        assert_eq!(sql_to_json(SqlValue::Real(0.5)), json!(0.5));
    }
}
