//! Cluster-aware sample writer
//!
//! Owns one batcher per app-label width, created lazily on the first sample
//! of that width. Creation performs online schema widening: ensure the local
//! tables exist, probe the catalog for the current physical width, ALTER in
//! any missing columns, then replay the DDL on every peer node. Peer failures
//! are warnings; the local node keeps accepting writes.
//!
//! Ingest is best-effort: write-path errors are counted and logged on the
//! transition into the error state, never propagated to the caller.

use crate::config::{TableOptions, WriterConfig};
use crate::discovery::PeerRegistry;
use crate::ingest::batcher::SampleBatcher;
use crate::ingest::flow_tag::FlowTagWriter;
use crate::ingest::sample::{
    Sample, TableSchema, APP_LABEL_COLUMN_PREFIX, MAX_APP_LABEL_COLUMN_INDEX, PROMETHEUS_DB,
    PROMETHEUS_TABLE,
};
use crate::store::{ColumnarConnector, ColumnarStore, Endpoint};
use crate::wire;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Ingest-side counters, shared with the batchers.
#[derive(Debug, Default)]
pub struct WriterCounters {
    metrics_count: AtomicU64,
    write_err: AtomicU64,
    /// Remote-write series dropped because their IDs are not assigned yet
    skipped_series: AtomicU64,
    in_error: AtomicBool,
}

impl WriterCounters {
    pub fn metrics_count(&self) -> u64 {
        self.metrics_count.load(Ordering::Relaxed)
    }

    pub fn write_err(&self) -> u64 {
        self.write_err.load(Ordering::Relaxed)
    }

    pub fn skipped_series(&self) -> u64 {
        self.skipped_series.load(Ordering::Relaxed)
    }

    pub(crate) fn add_metrics(&self, n: u64) {
        self.metrics_count.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped_series(&self, n: u64) {
        self.skipped_series.fetch_add(n, Ordering::Relaxed);
    }

    /// Count a write failure; log only when flipping into the error state.
    pub(crate) fn record_write_error(&self, detail: &str) {
        self.write_err.fetch_add(1, Ordering::Relaxed);
        if !self.in_error.swap(true, Ordering::Relaxed) {
            warn!("sample write failed: {detail}");
        }
    }

    pub(crate) fn mark_write_ok(&self) {
        self.in_error.store(false, Ordering::Relaxed);
    }
}

/// Cluster-aware writer for the wide sample table
pub struct SampleWriter {
    name: String,
    endpoint: Endpoint,
    connector: Arc<dyn ColumnarConnector>,
    peers: Arc<dyn PeerRegistry>,
    table_options: TableOptions,
    writer_config: WriterConfig,
    column_increment: usize,
    /// Lazy connection to the local columnar node; reset to `None` on error
    conn: Mutex<Option<Arc<dyn ColumnarStore>>>,
    /// One handle per app-label width; lock-free fast path, creation
    /// serialized by `create_lock`
    writers: Box<[OnceLock<Arc<SampleBatcher>>]>,
    create_lock: Mutex<()>,
    flow_tags: FlowTagWriter,
    counters: Arc<WriterCounters>,
}

impl SampleWriter {
    pub fn new(
        name: impl Into<String>,
        endpoint: Endpoint,
        connector: Arc<dyn ColumnarConnector>,
        peers: Arc<dyn PeerRegistry>,
        table_options: TableOptions,
        writer_config: WriterConfig,
        column_increment: usize,
    ) -> Self {
        let mut writers = Vec::with_capacity(MAX_APP_LABEL_COLUMN_INDEX + 1);
        writers.resize_with(MAX_APP_LABEL_COLUMN_INDEX + 1, OnceLock::new);
        Self {
            name: name.into(),
            endpoint,
            connector,
            peers,
            table_options,
            writer_config,
            column_increment: column_increment.max(1),
            conn: Mutex::new(None),
            writers: writers.into_boxed_slice(),
            create_lock: Mutex::new(()),
            flow_tags: FlowTagWriter::new(),
            counters: Arc::new(WriterCounters::default()),
        }
    }

    /// Create the database, the flow tag tables, and the zero-width sample
    /// table so queries can run before the first sample arrives.
    pub async fn init(&self) -> Result<()> {
        let conn = self.ensure_conn().await?;
        conn.execute(&format!("CREATE DATABASE IF NOT EXISTS {PROMETHEUS_DB}"))
            .await?;
        for sql in self.flow_tags.create_statements(&self.table_options) {
            conn.execute(&sql).await?;
        }
        self.get_or_create(&Sample {
            timestamp_ms: 0,
            metric_id: 0,
            target_id: 0,
            value: 0.0,
            value_type: 0,
            app_label_value_ids: vec![0],
        })
        .await?;
        Ok(())
    }

    pub fn counters(&self) -> Arc<WriterCounters> {
        self.counters.clone()
    }

    /// Write a homogeneous batch: same metric, same app-label width. Errors
    /// are absorbed (the upstream queue re-presents data); the flow tags of
    /// the batch are recorded once.
    pub async fn write_batch(
        &self,
        batch: Vec<Sample>,
        metric_name: &str,
        series: &wire::TimeSeries,
        label_name_ids: &[u32],
        label_value_ids: &[u32],
    ) {
        if batch.is_empty() {
            return;
        }

        let writer = match self.get_or_create(&batch[0]).await {
            Ok(writer) => writer,
            Err(e) => {
                self.counters.record_write_error(&format!("get writer failed: {e}"));
                return;
            }
        };

        // Flow tags are identical across the batch; record from the series once.
        self.flow_tags
            .record(metric_name, series, label_name_ids, label_value_ids);
        let conn = self.conn.lock().await.clone();
        if let Some(conn) = conn {
            self.flow_tags.flush_cached(conn.as_ref()).await;
        }

        self.counters.add_metrics(batch.len() as u64);
        writer.put(batch);
    }

    /// Flush pending flow tag entries.
    pub async fn flush(&self) {
        let conn = self.conn.lock().await.clone();
        if let Some(conn) = conn {
            self.flow_tags.flush_cached(conn.as_ref()).await;
        }
    }

    /// Stop all per-width batchers, draining up to the flush timeout each.
    pub async fn close(&self) {
        self.flush().await;
        for slot in self.writers.iter() {
            if let Some(writer) = slot.get() {
                writer.close().await;
            }
        }
    }

    async fn ensure_conn(&self) -> Result<Arc<dyn ColumnarStore>> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.connector.connect(&self.endpoint).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_conn(&self) {
        *self.conn.lock().await = None;
    }

    async fn get_or_create(&self, sample: &Sample) -> Result<Arc<SampleBatcher>> {
        // Slot 0 is the target slot.
        if sample.app_label_value_ids.is_empty() {
            return Err(Error::Ingest("app label value IDs is empty".into()));
        }
        let app_label_count = sample.app_label_count();
        if app_label_count > MAX_APP_LABEL_COLUMN_INDEX {
            return Err(Error::Ingest(format!(
                "app label count({app_label_count}) is > MAX_APP_LABEL_COLUMN_INDEX({MAX_APP_LABEL_COLUMN_INDEX})"
            )));
        }
        if let Some(writer) = self.writers[app_label_count].get() {
            return Ok(writer.clone());
        }

        let _guard = self.create_lock.lock().await;
        // check again
        if let Some(writer) = self.writers[app_label_count].get() {
            return Ok(writer.clone());
        }

        let conn = self.ensure_conn().await?;

        let start = Instant::now();
        info!(
            writer = %self.name,
            app_label_count,
            "start creating sample writer"
        );
        let schema = Sample::table_schema(&self.table_options, app_label_count);

        conn.execute(&format!("CREATE DATABASE IF NOT EXISTS {PROMETHEUS_DB}"))
            .await?;
        for sql in schema.create_statements() {
            conn.execute(&sql).await?;
        }

        let current = match self.current_app_label_column_count(conn.as_ref()).await {
            Ok(count) => count,
            Err(e) => {
                self.reset_conn().await;
                return Err(e);
            }
        };

        if current < app_label_count {
            // Round the target width up to the configured increment so bursts
            // of new widths batch into fewer ALTER rounds.
            let target = app_label_count
                .div_ceil(self.column_increment)
                .saturating_mul(self.column_increment)
                .min(MAX_APP_LABEL_COLUMN_INDEX);
            self.add_app_label_columns(conn.as_ref(), current + 1, target)
                .await?;

            // Replay on peers: failures must not block local ingest.
            if let Err(e) = self.widen_peers(&schema, current + 1, target).await {
                warn!(
                    writer = %self.name,
                    "peer widening from {} to {} failed: {e}",
                    current + 1,
                    target
                );
            }
        }

        let writer = SampleBatcher::start(
            conn.clone(),
            schema.database.clone(),
            schema.local_table(),
            schema.column_names(),
            app_label_count,
            &self.writer_config,
            self.counters.clone(),
        );
        let _ = self.writers[app_label_count].set(writer.clone());
        info!(
            writer = %self.name,
            app_label_count,
            elapsed = ?start.elapsed(),
            "finish creating sample writer"
        );
        Ok(writer)
    }

    async fn current_app_label_column_count(&self, conn: &dyn ColumnarStore) -> Result<usize> {
        let sql = format!(
            "SELECT count(0) FROM system.columns WHERE database='{PROMETHEUS_DB}' \
             AND table='{PROMETHEUS_TABLE}' AND name LIKE '%{APP_LABEL_COLUMN_PREFIX}%'"
        );
        info!("{sql}");
        let result = conn.query(&sql).await?;
        let count = result
            .values
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::Schema("column count query returned no rows".into()))?;
        Ok(count as usize)
    }

    /// ALTER in columns `start..=end` on the storage table and, under cluster
    /// mode, the distributed front. "Already exists" is success.
    async fn add_app_label_columns(
        &self,
        conn: &dyn ColumnarStore,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let schema = Sample::table_schema(&self.table_options, 0);
        let mut tables = vec![schema.local_table()];
        if self.table_options.cluster.is_some() {
            tables.push(PROMETHEUS_TABLE.to_string());
        }
        for i in start..=end {
            for table in &tables {
                let sql = format!(
                    "ALTER TABLE {PROMETHEUS_DB}.`{table}` ADD COLUMN {APP_LABEL_COLUMN_PREFIX}_{i} UInt32"
                );
                if let Err(e) = conn.execute(&sql).await {
                    if e.to_string().contains("already exists") {
                        info!("db: {PROMETHEUS_DB}, table: {table} error: {e}");
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn widen_peers(&self, schema: &TableSchema, start: usize, end: usize) -> Result<()> {
        let peers = self.peers.peers().await?;
        for peer in peers {
            match self.connector.connect(&peer).await {
                Ok(conn) => {
                    let mut failed = false;
                    for sql in std::iter::once(format!(
                        "CREATE DATABASE IF NOT EXISTS {PROMETHEUS_DB}"
                    ))
                    .chain(schema.create_statements())
                    {
                        if let Err(e) = conn.execute(&sql).await {
                            warn!(peer = %peer, "peer table create failed: {e}");
                            failed = true;
                            break;
                        }
                    }
                    if !failed {
                        if let Err(e) = self.add_app_label_columns(conn.as_ref(), start, end).await
                        {
                            warn!(peer = %peer, "peer column widening failed: {e}");
                        } else {
                            info!(peer = %peer, "peer schema widened to {end}");
                        }
                    }
                }
                Err(e) => warn!(peer = %peer, "peer dial failed: {e}"),
            }
        }
        Ok(())
    }
}
