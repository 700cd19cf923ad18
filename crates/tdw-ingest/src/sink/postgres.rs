//! PostgreSQL sink
//!
//! Layers map to PostgreSQL schemas and datasets to tables inside them.
//! Overwrites run in a single transaction (drop, create, batched insert), so
//! readers see either the previous contents or the new ones.

use super::TableSink;
use crate::config::DatabaseConfig;
use crate::error::{IngestError, Result};
use crate::record::{parse_timestamp, render, Record, Table, TableName};
use crate::schema::{Column, ColumnType, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

/// PostgreSQL bind parameter limit per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per INSERT statement, lowered for wide tables
const CHUNK_SIZE: usize = 500;

/// Sink backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Open the connection pool shared by every dataset of a run.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                IngestError::Connection(format!(
                    "Failed to connect to postgres at {}:{}/{}: {}",
                    config.host, config.port, config.database, e
                ))
            })?;

        info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl TableSink for PostgresSink {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(namespace));
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!(namespace, "Ensured schema exists");
        Ok(())
    }

    async fn read_table(&self, name: &TableName) -> Result<Table> {
        let columns: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&name.layer)
        .bind(name.relation())
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Err(IngestError::TableNotFound(name.qualified()));
        }

        let schema = Schema::new(
            columns
                .iter()
                .map(|(column, data_type)| Column::new(column.clone(), column_type_for(data_type)))
                .collect(),
        );

        let sql = format!("SELECT to_jsonb(t) AS row FROM {} t", qualified_ident(name));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(value): Json<Value> = row.try_get("row")?;
            let mut raw = match value {
                Value::Object(map) => map,
                other => {
                    return Err(IngestError::sink(format!(
                        "Unexpected row shape in {}: {}",
                        name, other
                    )))
                },
            };

            // jsonb does not keep key order
            let mut record = Record::new();
            for column in schema.columns() {
                let value = raw.remove(&column.name).unwrap_or(Value::Null);
                record.insert(column.name.clone(), value);
            }
            records.push(record);
        }

        info!(table = %name, rows = records.len(), "Read table");

        Ok(Table {
            name: name.clone(),
            schema,
            records,
        })
    }

    async fn overwrite_table(&self, table: &Table) -> Result<()> {
        let target = qualified_ident(&table.name);
        let rows = table
            .records
            .iter()
            .map(|record| to_cells(&table.schema, record))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_table_sql(&table.name, &table.schema))
            .execute(&mut *tx)
            .await?;

        if !table.schema.is_empty() {
            let column_list = table
                .schema
                .columns()
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let chunk_size = rows_per_statement(table.schema.len());

            for chunk in rows.chunks(chunk_size) {
                let mut query_builder =
                    QueryBuilder::new(format!("INSERT INTO {} ({}) ", target, column_list));

                query_builder.push_values(chunk.iter().cloned(), |mut b, row| {
                    for cell in row {
                        match cell {
                            SqlCell::Float(v) => b.push_bind(v),
                            SqlCell::Integer(v) => b.push_bind(v),
                            SqlCell::Long(v) => b.push_bind(v),
                            SqlCell::Text(v) => b.push_bind(v),
                            SqlCell::Boolean(v) => b.push_bind(v),
                            SqlCell::Timestamp(v) => b.push_bind(v),
                            SqlCell::Json(v) => b.push_bind(v),
                        };
                    }
                });

                query_builder.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;

        info!(table = %table.name, rows = table.len(), "Overwrote table");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Typed, nullable bind value
#[derive(Debug, Clone, PartialEq)]
enum SqlCell {
    Float(Option<f64>),
    Integer(Option<i32>),
    Long(Option<i64>),
    Text(Option<String>),
    Boolean(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<Json<Value>>),
}

fn to_cells(schema: &Schema, record: &Record) -> Result<Vec<SqlCell>> {
    schema
        .columns()
        .iter()
        .map(|column| to_cell(column, record.get(&column.name).unwrap_or(&Value::Null)))
        .collect()
}

fn to_cell(column: &Column, value: &Value) -> Result<SqlCell> {
    let present = !value.is_null();
    let mismatch = || IngestError::coercion(&column.name, &column.data_type, value);

    let cell = match &column.data_type {
        ColumnType::Float => SqlCell::Float(value.as_f64()),
        ColumnType::Integer => {
            SqlCell::Integer(value.as_i64().and_then(|v| i32::try_from(v).ok()))
        },
        ColumnType::Long => SqlCell::Long(value.as_i64()),
        ColumnType::String => SqlCell::Text(present.then(|| render(value))),
        ColumnType::Boolean => SqlCell::Boolean(value.as_bool()),
        ColumnType::Timestamp => SqlCell::Timestamp(parse_timestamp(value)),
        ColumnType::Struct(_) | ColumnType::List(_) => {
            SqlCell::Json(present.then(|| Json(value.clone())))
        },
    };

    if present && cell.is_null() {
        return Err(mismatch());
    }
    Ok(cell)
}

impl SqlCell {
    fn is_null(&self) -> bool {
        match self {
            SqlCell::Float(v) => v.is_none(),
            SqlCell::Integer(v) => v.is_none(),
            SqlCell::Long(v) => v.is_none(),
            SqlCell::Text(v) => v.is_none(),
            SqlCell::Boolean(v) => v.is_none(),
            SqlCell::Timestamp(v) => v.is_none(),
            SqlCell::Json(v) => v.is_none(),
        }
    }
}

fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, CHUNK_SIZE)
}

/// SQL column type for a schema column type
fn sql_type(column_type: &ColumnType) -> &'static str {
    match column_type {
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Integer => "INTEGER",
        ColumnType::Long => "BIGINT",
        ColumnType::String => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMPTZ",
        ColumnType::Struct(_) | ColumnType::List(_) => "JSONB",
    }
}

/// Schema column type for an `information_schema` data type.
///
/// JSONB columns come back as strings; their values stay structured.
fn column_type_for(data_type: &str) -> ColumnType {
    match data_type {
        "double precision" | "real" | "numeric" => ColumnType::Float,
        "integer" | "smallint" => ColumnType::Integer,
        "bigint" => ColumnType::Long,
        "boolean" => ColumnType::Boolean,
        "timestamp with time zone" | "timestamp without time zone" => ColumnType::Timestamp,
        _ => ColumnType::String,
    }
}

fn create_table_sql(name: &TableName, schema: &Schema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(&c.data_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", qualified_ident(name), columns)
}

/// Double-quote an identifier, doubling embedded quotes
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified_ident(name: &TableName) -> String {
    format!("{}.{}", quote_ident(&name.layer), quote_ident(&name.relation()))
}
