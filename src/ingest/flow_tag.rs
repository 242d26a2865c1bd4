//! Flow tag recording
//!
//! Every ingested batch contributes one `(metric, label name)` entry to the
//! field table and one `(metric, label name, label value)` entry to the
//! field-value table, covering app and target labels alike. A bounded
//! fingerprint cache deduplicates entries before they reach the store; the
//! companion tables are logically sets, so the occasional re-insert after
//! eviction is tolerated.

use crate::config::TableOptions;
use crate::ingest::sample::PROMETHEUS_DB;
use crate::store::{ColumnarStore, Value};
use crate::wire;
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::debug;

/// Field (tag name) table.
pub const FIELD_TABLE: &str = "prometheus_custom_field";
/// Field value table.
pub const FIELD_VALUE_TABLE: &str = "prometheus_custom_field_value";

/// Upper bound on distinct fingerprints held for deduplication.
pub const DEFAULT_TAG_CACHE_CAPACITY: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FlowTag {
    timestamp_ms: i64,
    /// Metric the tag was observed on
    table: String,
    field_name: String,
    /// Empty for field-table entries
    field_value: String,
}

/// Records newly observed tag pairs into the companion tables
pub struct FlowTagWriter {
    cache: Cache<u64, ()>,
    pending_fields: Mutex<Vec<FlowTag>>,
    pending_values: Mutex<Vec<FlowTag>>,
}

impl Default for FlowTagWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTagWriter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TAG_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            cache: Cache::new(capacity),
            pending_fields: Mutex::new(Vec::new()),
            pending_values: Mutex::new(Vec::new()),
        }
    }

    /// DDL for the companion tables. Both are plain sets ordered by their
    /// natural key; duplicates collapse at merge time.
    pub fn create_statements(&self, opts: &TableOptions) -> Vec<String> {
        let ttl = if opts.ttl_days > 0 {
            format!(" TTL time + toIntervalDay({})", opts.ttl_days)
        } else {
            String::new()
        };
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {PROMETHEUS_DB}.`{FIELD_TABLE}` \
                 (`time` DateTime, `table` String, `field_name` String) \
                 ENGINE = ReplacingMergeTree() \
                 ORDER BY (`table`, `field_name`){ttl}"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {PROMETHEUS_DB}.`{FIELD_VALUE_TABLE}` \
                 (`time` DateTime, `table` String, `field_name` String, `field_value` String) \
                 ENGINE = ReplacingMergeTree() \
                 ORDER BY (`table`, `field_name`, `field_value`){ttl}"
            ),
        ]
    }

    /// Derive flow tags from one series and stage the ones not seen before.
    /// `label_name_ids`/`label_value_ids` parallel `series.labels` and feed
    /// the fingerprint when available; labels beyond the ID slices fall back
    /// to string hashing.
    pub fn record(
        &self,
        metric_name: &str,
        series: &wire::TimeSeries,
        label_name_ids: &[u32],
        label_value_ids: &[u32],
    ) {
        let timestamp_ms = series
            .samples
            .first()
            .map(|s| s.timestamp)
            .unwrap_or_default();
        let metric_crc = crc32(metric_name.as_bytes());

        for (i, label) in series.labels.iter().enumerate() {
            if label.name == wire::METRIC_NAME_LABEL {
                continue;
            }

            let pair_crc = match (label_name_ids.get(i), label_value_ids.get(i)) {
                (Some(name_id), Some(value_id)) => {
                    let mut buf = [0u8; 8];
                    buf[..4].copy_from_slice(&name_id.to_le_bytes());
                    buf[4..].copy_from_slice(&value_id.to_le_bytes());
                    crc32(&buf)
                }
                _ => {
                    let mut h = crc32fast::Hasher::new();
                    h.update(label.name.as_bytes());
                    h.update(b"\0");
                    h.update(label.value.as_bytes());
                    h.finalize()
                }
            };
            let fingerprint = ((metric_crc as u64) << 32) | pair_crc as u64;
            if self.cache.contains_key(&fingerprint) {
                continue;
            }
            self.cache.insert(fingerprint, ());

            self.pending_fields.lock().push(FlowTag {
                timestamp_ms,
                table: metric_name.to_string(),
                field_name: label.name.clone(),
                field_value: String::new(),
            });
            self.pending_values.lock().push(FlowTag {
                timestamp_ms,
                table: metric_name.to_string(),
                field_name: label.name.clone(),
                field_value: label.value.clone(),
            });
        }
    }

    /// Forward staged entries to the companion tables. Failed inserts are
    /// dropped; the fingerprints age out of the cache and the pairs are
    /// re-recorded by later batches.
    pub async fn flush_cached(&self, store: &dyn ColumnarStore) {
        let fields: Vec<FlowTag> = std::mem::take(&mut *self.pending_fields.lock());
        let values: Vec<FlowTag> = std::mem::take(&mut *self.pending_values.lock());
        if fields.is_empty() && values.is_empty() {
            return;
        }
        debug!(
            fields = fields.len(),
            values = values.len(),
            "flushing flow tags"
        );

        if !fields.is_empty() {
            let columns = ["time", "table", "field_name"].map(String::from).to_vec();
            let rows: Vec<Vec<Value>> = fields
                .iter()
                .map(|t| {
                    vec![
                        Value::DateTime(t.timestamp_ms / 1000),
                        Value::String(t.table.clone()),
                        Value::String(t.field_name.clone()),
                    ]
                })
                .collect();
            let _ = store
                .insert(PROMETHEUS_DB, FIELD_TABLE, &columns, &rows)
                .await;
        }
        if !values.is_empty() {
            let columns = ["time", "table", "field_name", "field_value"]
                .map(String::from)
                .to_vec();
            let rows: Vec<Vec<Value>> = values
                .iter()
                .map(|t| {
                    vec![
                        Value::DateTime(t.timestamp_ms / 1000),
                        Value::String(t.table.clone()),
                        Value::String(t.field_name.clone()),
                        Value::String(t.field_value.clone()),
                    ]
                })
                .collect();
            let _ = store
                .insert(PROMETHEUS_DB, FIELD_VALUE_TABLE, &columns, &rows)
                .await;
        }
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueryResult;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingStore {
        rows: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl ColumnarStore for CountingStore {
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
        async fn query(&self, _sql: &str) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }
        async fn insert(
            &self,
            _database: &str,
            table: &str,
            _columns: &[String],
            rows: &[Vec<Value>],
        ) -> Result<()> {
            self.rows.lock().push((table.into(), rows.len()));
            Ok(())
        }
    }

    fn series() -> wire::TimeSeries {
        wire::TimeSeries {
            labels: vec![
                wire::Label {
                    name: wire::METRIC_NAME_LABEL.into(),
                    value: "up".into(),
                },
                wire::Label {
                    name: "job".into(),
                    value: "node".into(),
                },
                wire::Label {
                    name: "instance".into(),
                    value: "10.0.0.1:9100".into(),
                },
            ],
            samples: vec![wire::Sample {
                value: 1.0,
                timestamp: 1_700_000_000_000,
            }],
        }
    }

    #[tokio::test]
    async fn test_duplicate_series_records_once() {
        let writer = FlowTagWriter::new();
        let store = Arc::new(CountingStore::default());

        writer.record("up", &series(), &[0, 1, 2], &[0, 10, 20]);
        writer.flush_cached(store.as_ref()).await;
        let first: usize = store.rows.lock().iter().map(|(_, n)| n).sum();
        assert_eq!(first, 4); // 2 labels x (field + field_value)

        writer.record("up", &series(), &[0, 1, 2], &[0, 10, 20]);
        writer.flush_cached(store.as_ref()).await;
        let second: usize = store.rows.lock().iter().map(|(_, n)| n).sum();
        assert_eq!(second, first);
    }

    #[test]
    fn test_metric_name_label_skipped() {
        let writer = FlowTagWriter::new();
        writer.record("up", &series(), &[], &[]);
        assert_eq!(writer.pending_fields.lock().len(), 2);
        assert!(writer
            .pending_fields
            .lock()
            .iter()
            .all(|t| t.field_name != wire::METRIC_NAME_LABEL));
    }

    #[test]
    fn test_ddl_names_both_tables() {
        let writer = FlowTagWriter::new();
        let ddl = writer.create_statements(&TableOptions {
            ttl_days: 7,
            ..Default::default()
        });
        assert_eq!(ddl.len(), 2);
        assert!(ddl[0].contains(FIELD_TABLE));
        assert!(ddl[1].contains(FIELD_VALUE_TABLE));
        assert!(ddl[1].contains("toIntervalDay(7)"));
    }
}
