//! Query path: remote read translation and PromQL execution
//!
//! Remote-read requests (and PromQL selects, which are shaped like them) are
//! rewritten into SQL against the columnar store, then the result set is
//! rebuilt into Prometheus time series. The PromQL evaluator itself is an
//! external collaborator behind [`promql::PromqlEngine`].
//!
//! Queries are cancelled by dropping their future; the outstanding store
//! call is aborted with it and the error, if any, surfaces verbatim.

pub mod promql;
pub mod remote_read;
pub mod response;

pub use promql::{
    EngineOptions, PromExecutor, PromQueryData, PromQueryParams, PromQueryResponse,
    PromSeriesParams, PromValue, PromqlEngine, Querier, QueryStats, Queryable, SelectHints,
    SeriesSet,
};
pub use remote_read::{PreparedQuery, RemoteReadTranslator};

/// How tag names are prefixed in response labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagPrefix {
    /// No prefixing; tags pass through as-is
    #[default]
    None,
    /// Platform-injected tags get the configured auto-tagging prefix
    /// (queries against native Prometheus metrics)
    Auto,
    /// Prometheus-native tags get a `tag_` prefix (queries against the
    /// platform's own metric tables)
    Native,
}
