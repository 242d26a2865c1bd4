//! Sample row model and table schema generation
//!
//! A sample is one row of the wide `prometheus.samples` table: a fixed prefix
//! (`time`, `metric_id`, `target_id`, `value`, `value_type`) followed by one
//! `UInt32` value-ID column per app label slot. The schema for a given
//! app-label width is generated here; widening an existing table is the
//! writer's job.

use crate::config::TableOptions;
use crate::store::Value;

/// Largest supported app-label column index.
pub const MAX_APP_LABEL_COLUMN_INDEX: usize = 256;

/// Database holding the sample table.
pub const PROMETHEUS_DB: &str = "prometheus";
/// Logical (distributed under cluster mode) sample table name.
pub const PROMETHEUS_TABLE: &str = "samples";

/// Column-name prefix shared by all app label columns; the catalog probe
/// matches on it.
pub const APP_LABEL_COLUMN_PREFIX: &str = "app_label_value_id";

/// One sample row.
///
/// `app_label_value_ids` is indexed by layout column index. Slot 0 is the
/// target slot: the target itself is persisted through `target_id`, so slot 0
/// never reaches a table column, but it keeps layout indices 1-based and the
/// batch width unambiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Milliseconds since epoch
    pub timestamp_ms: i64,
    pub metric_id: u32,
    pub target_id: u32,
    pub value: f64,
    /// Sample encoding discriminator; 0 for plain float samples
    pub value_type: u8,
    pub app_label_value_ids: Vec<u32>,
}

impl Sample {
    /// Number of app label columns this sample occupies (slot 0 excluded).
    pub fn app_label_count(&self) -> usize {
        self.app_label_value_ids.len().saturating_sub(1)
    }

    /// Insert row for a width-`width` writer: fixed prefix then app label
    /// slots 1..=width, zero-padded.
    pub fn to_row(&self, width: usize) -> Vec<Value> {
        let mut row = Vec::with_capacity(5 + width);
        row.push(Value::DateTime(self.timestamp_ms / 1000));
        row.push(Value::UInt(self.metric_id as u64));
        row.push(Value::UInt(self.target_id as u64));
        row.push(Value::Float64(self.value));
        row.push(Value::UInt(self.value_type as u64));
        for i in 1..=width {
            let id = self.app_label_value_ids.get(i).copied().unwrap_or(0);
            row.push(Value::UInt(id as u64));
        }
        row
    }

    /// Generate the sample table schema for `app_label_count` app label
    /// columns under the given placement options.
    pub fn table_schema(opts: &TableOptions, app_label_count: usize) -> TableSchema {
        let mut columns = vec![
            Column::new("time", "DateTime"),
            Column::new("metric_id", "UInt32"),
            Column::new("target_id", "UInt32"),
            Column::new("value", "Float64"),
            Column::new("value_type", "UInt8"),
        ];
        for i in 1..=app_label_count {
            columns.push(Column::new(
                format!("{APP_LABEL_COLUMN_PREFIX}_{i}"),
                "UInt32",
            ));
        }
        TableSchema {
            database: PROMETHEUS_DB.to_string(),
            table: PROMETHEUS_TABLE.to_string(),
            columns,
            options: opts.clone(),
        }
    }
}

/// A column of a generated table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: &'static str,
}

impl Column {
    fn new(name: impl Into<String>, column_type: &'static str) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Generated schema for the sample table at one app-label width
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub database: String,
    pub table: String,
    pub columns: Vec<Column>,
    pub options: TableOptions,
}

impl TableSchema {
    /// Physical table the rows land in: `samples_local` under cluster mode,
    /// `samples` otherwise.
    pub fn local_table(&self) -> String {
        if self.options.cluster.is_some() {
            format!("{}_local", self.table)
        } else {
            self.table.clone()
        }
    }

    /// Names of the insert columns, in row order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// DDL to create the table(s): the storage table first, then the
    /// distributed front under cluster mode. All statements are idempotent.
    pub fn create_statements(&self) -> Vec<String> {
        let mut statements = vec![self.create_local()];
        if let Some(cluster) = &self.options.cluster {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {db}.`{table}` AS {db}.`{local}` \
                 ENGINE = Distributed('{cluster}', '{db}', '{local}', metric_id)",
                db = self.database,
                table = self.table,
                local = self.local_table(),
            ));
        }
        statements
    }

    fn create_local(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("`{}` {}", c.name, c.column_type))
            .collect::<Vec<_>>()
            .join(", ");

        let mut ttl_parts = Vec::new();
        if let Some(cold) = &self.options.cold_storage {
            ttl_parts.push(format!(
                "time + toIntervalDay({}) TO VOLUME '{}'",
                cold.after_days, cold.volume
            ));
        }
        if self.options.ttl_days > 0 {
            ttl_parts.push(format!("time + toIntervalDay({})", self.options.ttl_days));
        }

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {db}.`{table}` ({columns}) \
             ENGINE = MergeTree() \
             PARTITION BY toYYYYMMDD(time) \
             ORDER BY (metric_id, target_id, time)",
            db = self.database,
            table = self.local_table(),
        );
        if !ttl_parts.is_empty() {
            sql.push_str(&format!(" TTL {}", ttl_parts.join(", ")));
        }
        if let Some(policy) = &self.options.storage_policy {
            sql.push_str(&format!(" SETTINGS storage_policy = '{policy}'"));
        }
        sql
    }
}
