//! Background sample batcher
//!
//! One batcher exists per app-label width. Batches are distributed across a
//! configurable number of bounded queues; each queue is drained by a worker
//! that flushes on batch size or flush timeout. A batch always lands on a
//! single queue, so samples within one batch reach the store in order.

use crate::config::WriterConfig;
use crate::ingest::sample::Sample;
use crate::ingest::writer::WriterCounters;
use crate::store::ColumnarStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct SampleBatcher {
    senders: Vec<mpsc::Sender<Vec<Sample>>>,
    next_queue: AtomicUsize,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    flush_timeout: std::time::Duration,
    counters: Arc<WriterCounters>,
}

impl SampleBatcher {
    /// Spawn the worker tasks for one per-width writer.
    pub(crate) fn start(
        store: Arc<dyn ColumnarStore>,
        database: String,
        table: String,
        columns: Vec<String>,
        width: usize,
        config: &WriterConfig,
        counters: Arc<WriterCounters>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let queue_count = config.queue_count.max(1);
        let mut senders = Vec::with_capacity(queue_count);
        let mut workers = Vec::with_capacity(queue_count);

        for queue in 0..queue_count {
            let (tx, rx) = mpsc::channel(config.queue_size.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(WorkerContext {
                queue,
                rx,
                store: store.clone(),
                database: database.clone(),
                table: table.clone(),
                columns: columns.clone(),
                width,
                batch_size: config.batch_size.max(1),
                flush_timeout: config.flush_timeout,
                counters: counters.clone(),
                cancel: cancel.clone(),
            })));
        }

        Arc::new(Self {
            senders,
            next_queue: AtomicUsize::new(0),
            cancel,
            workers: parking_lot::Mutex::new(workers),
            flush_timeout: config.flush_timeout,
            counters,
        })
    }

    /// Enqueue a batch on the next queue, keeping the batch intact. A full
    /// queue drops the batch and counts the failure.
    pub(crate) fn put(&self, batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        let idx = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        if let Err(e) = self.senders[idx].try_send(batch) {
            self.counters
                .record_write_error(&format!("queue {idx} rejected batch: {e}"));
        }
    }

    /// Stop the workers, draining queued samples for up to the flush timeout.
    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if tokio::time::timeout(self.flush_timeout, worker).await.is_err() {
                warn!("batcher worker did not drain within flush timeout");
            }
        }
    }
}

struct WorkerContext {
    queue: usize,
    rx: mpsc::Receiver<Vec<Sample>>,
    store: Arc<dyn ColumnarStore>,
    database: String,
    table: String,
    columns: Vec<String>,
    width: usize,
    batch_size: usize,
    flush_timeout: std::time::Duration,
    counters: Arc<WriterCounters>,
    cancel: CancellationToken,
}

async fn run_worker(mut ctx: WorkerContext) {
    let mut buffer: Vec<Sample> = Vec::with_capacity(ctx.batch_size);
    let mut ticker = tokio::time::interval(ctx.flush_timeout);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.reset();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                while let Ok(batch) = ctx.rx.try_recv() {
                    buffer.extend(batch);
                    if buffer.len() >= ctx.batch_size {
                        flush(&mut ctx, &mut buffer).await;
                    }
                }
                flush(&mut ctx, &mut buffer).await;
                return;
            }
            received = ctx.rx.recv() => match received {
                Some(batch) => {
                    buffer.extend(batch);
                    if buffer.len() >= ctx.batch_size {
                        flush(&mut ctx, &mut buffer).await;
                    }
                }
                None => {
                    flush(&mut ctx, &mut buffer).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(&mut ctx, &mut buffer).await;
            }
        }
    }
}

async fn flush(ctx: &mut WorkerContext, buffer: &mut Vec<Sample>) {
    if buffer.is_empty() {
        return;
    }
    let rows: Vec<_> = buffer.iter().map(|s| s.to_row(ctx.width)).collect();
    match ctx
        .store
        .insert(&ctx.database, &ctx.table, &ctx.columns, &rows)
        .await
    {
        Ok(()) => {
            debug!(
                queue = ctx.queue,
                rows = rows.len(),
                width = ctx.width,
                "flushed sample batch"
            );
            ctx.counters.mark_write_ok();
        }
        Err(e) => ctx.counters.record_write_error(&e.to_string()),
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{QueryResult, Value};
    use crate::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        inserts: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl ColumnarStore for RecordingStore {
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
        async fn query(&self, _sql: &str) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }
        async fn insert(
            &self,
            database: &str,
            table: &str,
            _columns: &[String],
            rows: &[Vec<Value>],
        ) -> Result<()> {
            self.inserts
                .lock()
                .push((database.into(), table.into(), rows.len()));
            Ok(())
        }
    }

    fn sample() -> Sample {
        Sample {
            timestamp_ms: 1_700_000_000_000,
            metric_id: 1,
            target_id: 1,
            value: 1.0,
            value_type: 0,
            app_label_value_ids: vec![0, 9],
        }
    }

    #[tokio::test]
    async fn test_flush_on_batch_size() {
        let store = Arc::new(RecordingStore::default());
        let config = WriterConfig {
            queue_count: 1,
            queue_size: 16,
            batch_size: 2,
            flush_timeout: Duration::from_secs(60),
        };
        let batcher = SampleBatcher::start(
            store.clone(),
            "prometheus".into(),
            "samples".into(),
            vec!["time".into()],
            1,
            &config,
            Arc::new(WriterCounters::default()),
        );

        batcher.put(vec![sample(), sample()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.inserts.lock().len(), 1);
        assert_eq!(store.inserts.lock()[0].2, 2);
        batcher.close().await;
    }

    #[tokio::test]
    async fn test_close_drains_partial_batch() {
        let store = Arc::new(RecordingStore::default());
        let config = WriterConfig {
            queue_count: 2,
            queue_size: 16,
            batch_size: 100,
            flush_timeout: Duration::from_secs(1),
        };
        let batcher = SampleBatcher::start(
            store.clone(),
            "prometheus".into(),
            "samples".into(),
            vec!["time".into()],
            1,
            &config,
            Arc::new(WriterCounters::default()),
        );

        batcher.put(vec![sample()]);
        batcher.put(vec![sample(), sample()]);
        batcher.close().await;

        let flushed: usize = store.inserts.lock().iter().map(|(_, _, n)| n).sum();
        assert_eq!(flushed, 3);
    }
}
