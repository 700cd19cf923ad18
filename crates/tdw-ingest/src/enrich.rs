//! Row hashing and processing timestamps

use crate::record::{render, Record, Table};
use crate::schema::{Column, ColumnType, Schema};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tdw_common::checksum::{digest_parts, ChecksumAlgorithm};
use tracing::debug;

pub const ROW_HASH_COLUMN: &str = "_rowHash";
pub const PROCESSED_TIMESTAMP_COLUMN: &str = "_processedTimestamp";

/// Separator placed between column values before hashing
pub const HASH_SEPARATOR: &str = "||";

const ENRICHMENT_COLUMNS: [&str; 2] = [ROW_HASH_COLUMN, PROCESSED_TIMESTAMP_COLUMN];

/// Appends `_rowHash` and `_processedTimestamp` to every record
#[derive(Debug, Clone, Copy, Default)]
pub struct Enricher {
    algorithm: ChecksumAlgorithm,
}

impl Enricher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Enrich with the current time as processing timestamp.
    pub fn enrich(&self, table: Table) -> Table {
        self.enrich_at(table, Utc::now())
    }

    /// Enrich with a fixed processing timestamp shared by every row.
    pub fn enrich_at(&self, table: Table, processed_at: DateTime<Utc>) -> Table {
        let base = table.schema.without(&ENRICHMENT_COLUMNS);
        let records = self.enrich_records(table.records, &base, processed_at);

        debug!(table = %table.name, rows = records.len(), "Enriched table");

        Table {
            name: table.name,
            schema: base
                .with_column(Column::new(ROW_HASH_COLUMN, ColumnType::String))
                .with_column(Column::new(PROCESSED_TIMESTAMP_COLUMN, ColumnType::Timestamp)),
            records,
        }
    }

    /// Enrich raw records against `schema`, which must not contain the
    /// enrichment columns.
    pub fn enrich_records(
        &self,
        records: Vec<Record>,
        schema: &Schema,
        processed_at: DateTime<Utc>,
    ) -> Vec<Record> {
        let timestamp = Value::String(processed_at.to_rfc3339_opts(SecondsFormat::AutoSi, true));

        records
            .into_iter()
            .map(|mut record| {
                for column in ENRICHMENT_COLUMNS {
                    record.remove(column);
                }
                let hash = self.row_hash(&record, schema);
                record.insert(ROW_HASH_COLUMN.to_string(), Value::String(hash));
                record.insert(PROCESSED_TIMESTAMP_COLUMN.to_string(), timestamp.clone());
                record
            })
            .collect()
    }

    /// Hash of the non-null column values in schema order.
    ///
    /// Enrichment columns never contribute, so the hash only changes when
    /// data does.
    pub fn row_hash(&self, record: &Record, schema: &Schema) -> String {
        let parts = schema
            .columns()
            .iter()
            .filter(|c| !ENRICHMENT_COLUMNS.contains(&c.name.as_str()))
            .filter_map(|c| record.get(&c.name))
            .filter(|v| !v.is_null())
            .map(render);

        digest_parts(parts, HASH_SEPARATOR, self.algorithm)
    }
}
