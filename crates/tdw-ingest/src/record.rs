//! Records and in-memory tables
//!
//! A [`Record`] is a flat key/value map exactly as it came off the wire. When
//! a [`Table`] is materialized, every record is coerced against the dataset
//! [`Schema`]: columns are put in schema order, unknown keys are dropped and
//! values are converted to the column type.

use crate::error::{IngestError, Result};
use crate::schema::{Column, ColumnType, Schema};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

/// One result row, column name to value
pub type Record = Map<String, Value>;

/// Destination name `<layer>.<source>_<dataset>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub layer: String,
    pub source: String,
    pub dataset: String,
}

impl TableName {
    pub fn new(
        layer: impl Into<String>,
        source: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            layer: layer.into(),
            source: source.into(),
            dataset: dataset.into(),
        }
    }

    /// Relation name inside the layer namespace
    pub fn relation(&self) -> String {
        format!("{}_{}", self.source, self.dataset)
    }

    /// Fully qualified `<layer>.<relation>`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.layer, self.relation())
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Named, typed set of records
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: TableName,
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl Table {
    /// Coerce raw records against `schema` and build a table.
    ///
    /// Fails on the first value that cannot be represented in its column
    /// type; no partially coerced table is ever returned.
    pub fn materialize(name: TableName, schema: Schema, raw: Vec<Record>) -> Result<Self> {
        let records = raw
            .into_iter()
            .map(|record| coerce_record(&schema, &record, ""))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            schema,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of `column` across all records, `Null` where absent
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        self.records
            .iter()
            .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn coerce_record(schema: &Schema, record: &Record, prefix: &str) -> Result<Record> {
    let mut out = Record::new();
    for column in schema.columns() {
        let value = record.get(&column.name).unwrap_or(&Value::Null);
        let path = qualify(prefix, &column.name);
        out.insert(column.name.clone(), coerce_value(column, value, &path)?);
    }
    Ok(out)
}

fn coerce_value(column: &Column, value: &Value, path: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let mismatch = || IngestError::coercion(path, &column.data_type, value);

    match &column.data_type {
        ColumnType::Float => as_f64(value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(mismatch),
        ColumnType::Integer => as_i64(value)
            .filter(|v| i32::try_from(*v).is_ok())
            .map(Value::from)
            .ok_or_else(mismatch),
        ColumnType::Long => as_i64(value).map(Value::from).ok_or_else(mismatch),
        ColumnType::String => Ok(Value::String(render(value))),
        ColumnType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        ColumnType::Timestamp => parse_timestamp(value)
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .ok_or_else(mismatch),
        ColumnType::Struct(nested) => match value {
            Value::Object(map) => Ok(Value::Object(coerce_record(nested, map, path)?)),
            _ => Err(mismatch()),
        },
        ColumnType::List(element) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => coerce_record(element, map, path).map(Value::Object),
                    Value::Null => Ok(Value::Null),
                    _ => Err(mismatch()),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            _ => Err(mismatch()),
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Text form of a value: strings verbatim, everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret a JSON value as a UTC timestamp.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC) and
/// epoch seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                })
        },
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let f = n.as_f64()?;
                let secs = f.floor();
                let nanos = ((f - secs) * 1e9).round() as u32;
                DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
            }
        },
        _ => None,
    }
}
