//! # Promlith
//!
//! The Prometheus integration core of a columnar observability store:
//! remote-write ingestion into a schema-evolving wide table, remote-read and
//! PromQL queries translated to SQL against the same table, and the
//! in-memory ID caches bridging high-cardinality label strings to the
//! compact integer IDs used as columnar keys.
//!
//! ## Architecture
//!
//! - **Ingest**: resolve labels to IDs, batch fixed-width sample rows, widen
//!   the physical schema online (locally and on cluster peers) as new
//!   app-label slots appear, and record newly observed tag pairs
//! - **ID cache**: seven sub-caches refreshed periodically from the system
//!   of record under a single-flight discipline
//! - **Query**: rewrite remote-read / PromQL selects into SQL preserving
//!   Prometheus semantics, then rebuild time series from columnar results
//!
//! The columnar engine, the relational system of record, and the PromQL
//! evaluator are external collaborators expressed as traits
//! ([`store::ColumnarStore`], [`cache::IdRegistry`],
//! [`query::promql::PromqlEngine`]).

pub mod api;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod ingest;
pub mod query;
pub mod rate_limit;
pub mod store;
pub mod telemetry;
pub mod wire;

mod error;

pub use config::{Config, ConfigPatch, TableOptions, WriterConfig};
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::cache::{IdCache, IdRegistry, TargetKey};
    pub use crate::discovery::{PeerRegistry, StaticPeerRegistry};
    pub use crate::ingest::{Sample, SampleWriter};
    pub use crate::query::{PromExecutor, PromqlEngine, RemoteReadTranslator};
    pub use crate::store::{ColumnarConnector, ColumnarStore, Endpoint, QueryResult, Value};
    pub use crate::{Config, Error, Result, TableOptions, WriterConfig};
}
