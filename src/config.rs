//! Runtime configuration
//!
//! Recognized options for the Prometheus integration layer. The full `Config`
//! is fixed at construction; the small subset in [`ConfigPatch`] can be
//! adjusted at runtime through the config endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tag-name prefix applied to platform-injected ("auto") tags in responses.
pub const DEFAULT_AUTO_TAGGING_PREFIX: &str = "df_";

/// Configuration for the Prometheus integration layer
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix for platform-injected tags in query responses (and recognized
    /// on incoming matchers)
    pub auto_tagging_prefix: String,
    /// PromQL engine sample budget
    pub max_samples: usize,
    /// Maximum series per response; overflow is silently dropped
    pub series_limit: usize,
    /// Per-query SQL row limit
    pub limit: usize,
    /// Include auto-tag columns in projections and record SQL in stats
    pub request_query_with_debug: bool,
    /// ID cache refresh period
    pub cache_refresh_interval: Duration,
    /// Widening hint: ALTER target widths are rounded up to a multiple of
    /// this increment (1 = widen exactly to the observed width)
    pub app_label_column_increment: usize,
    /// Query admission rate, queries per second
    pub qps_limit: u64,
    /// Drop native tag columns holding zero values (`0`, `""`, `"{}"`) from
    /// response labels
    pub elide_zero_tags: bool,
    /// Sample writer batching
    pub writer: WriterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_tagging_prefix: DEFAULT_AUTO_TAGGING_PREFIX.to_string(),
            max_samples: 50_000_000,
            series_limit: 500,
            limit: 1_000_000,
            request_query_with_debug: false,
            cache_refresh_interval: Duration::from_secs(60),
            app_label_column_increment: 1,
            qps_limit: 100,
            elide_zero_tags: true,
            writer: WriterConfig::default(),
        }
    }
}

impl Config {
    /// Apply a runtime patch. Unset fields keep their current value.
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(v) = &patch.auto_tagging_prefix {
            self.auto_tagging_prefix = v.clone();
        }
        if let Some(v) = patch.series_limit {
            self.series_limit = v;
        }
        if let Some(v) = patch.limit {
            self.limit = v;
        }
        if let Some(v) = patch.request_query_with_debug {
            self.request_query_with_debug = v;
        }
        if let Some(v) = patch.elide_zero_tags {
            self.elide_zero_tags = v;
        }
    }
}

/// Runtime-updatable subset of [`Config`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub auto_tagging_prefix: Option<String>,
    pub series_limit: Option<usize>,
    pub limit: Option<usize>,
    pub request_query_with_debug: Option<bool>,
    pub elide_zero_tags: Option<bool>,
}

/// Sample writer batching configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of parallel batching queues per table writer
    pub queue_count: usize,
    /// Capacity of each queue, in enqueued batches
    pub queue_size: usize,
    /// Rows accumulated before a flush
    pub batch_size: usize,
    /// Flush even a partial batch after this long
    pub flush_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_count: 1,
            queue_size: 1024,
            batch_size: 1024,
            flush_timeout: Duration::from_secs(10),
        }
    }
}

/// Table placement options shared by all generated tables
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Cluster name; `None` runs in single-node mode without a `_local` twin
    pub cluster: Option<String>,
    /// ClickHouse storage policy name
    pub storage_policy: Option<String>,
    /// Row retention in days
    pub ttl_days: u32,
    /// Move data to a cold volume before expiry
    pub cold_storage: Option<ColdStorage>,
}

/// Cold storage tier for aged partitions
#[derive(Debug, Clone)]
pub struct ColdStorage {
    /// Target volume name
    pub volume: String,
    /// Move rows older than this many days
    pub after_days: u32,
}
