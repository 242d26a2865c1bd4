//! PromQL execution over the remote-read translator
//!
//! The PromQL evaluator is an external collaborator behind [`PromqlEngine`];
//! this module gives it a [`Queryable`] whose selects translate to SQL via
//! the remote-read path, and exposes the public query operations: instant
//! query, range query, series, label values, and remote-read passthrough.

use crate::config::Config;
use crate::query::remote_read::{RemoteReadTranslator, FUNC_SERIES};
use crate::query::response::build_time_series;
use crate::store::ColumnarStore;
use crate::wire::{self, LabelMatcher, MatcherType};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::error;

/// Engine construction options handed to the external PromQL evaluator.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_samples: usize,
    /// Per-query evaluation timeout
    pub timeout: Duration,
    pub enable_at_modifier: bool,
    pub enable_negative_offset: bool,
    pub enable_per_step_stats: bool,
    /// Interval used for subqueries written without an explicit step
    pub no_step_subquery_interval: Duration,
}

impl EngineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_samples: cfg.max_samples,
            timeout: Duration::from_secs(100),
            enable_at_modifier: true,
            enable_negative_offset: true,
            enable_per_step_stats: true,
            no_step_subquery_interval: Duration::from_secs(60),
        }
    }
}

/// Select hints passed from the engine into [`Querier::select`].
#[derive(Debug, Clone, Default)]
pub struct SelectHints {
    pub start_ms: i64,
    pub end_ms: i64,
    pub step_ms: i64,
    /// Aggregation function name, or [`FUNC_SERIES`] for series lookups
    pub func: String,
    pub grouping: Vec<String>,
    pub by: bool,
    pub range_ms: i64,
}

/// A resolved set of series, as returned by one select.
#[derive(Debug, Clone, Default)]
pub struct SeriesSet {
    pub series: Vec<wire::TimeSeries>,
}

impl SeriesSet {
    /// Sort by label set so merged sets can be deduplicated.
    pub fn sorted(mut self) -> Self {
        self.series.sort_by_key(label_set_key);
        self
    }

    /// Chained merge of several sets: union of series, deduplicated by label
    /// set, first occurrence wins.
    pub fn merge_chained(sets: Vec<SeriesSet>) -> SeriesSet {
        let mut merged: Vec<wire::TimeSeries> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for set in sets {
            for series in set.series {
                if seen.insert(label_set_key(&series)) {
                    merged.push(series);
                }
            }
        }
        merged.sort_by_key(label_set_key);
        SeriesSet { series: merged }
    }
}

fn label_set_key(series: &wire::TimeSeries) -> Vec<(String, String)> {
    let mut key: Vec<(String, String)> = series
        .labels
        .iter()
        .map(|l| (l.name.clone(), l.value.clone()))
        .collect();
    key.sort();
    key
}

/// One series of an instant query result
#[derive(Debug, Clone, Serialize)]
pub struct InstantSeries {
    pub metric: BTreeMap<String, String>,
    /// `[unix seconds, value]`
    pub value: (f64, String),
}

/// One series of a range query result
#[derive(Debug, Clone, Serialize)]
pub struct RangeSeries {
    pub metric: BTreeMap<String, String>,
    pub values: Vec<(f64, String)>,
}

/// A PromQL evaluation result
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PromValue {
    Vector(Vec<InstantSeries>),
    Matrix(Vec<RangeSeries>),
}

impl PromValue {
    pub fn result_type(&self) -> &'static str {
        match self {
            PromValue::Vector(_) => "vector",
            PromValue::Matrix(_) => "matrix",
        }
    }
}

/// External PromQL evaluator
#[async_trait]
pub trait PromqlEngine: Send + Sync {
    async fn instant_query(
        &self,
        queryable: Arc<dyn Queryable>,
        promql: &str,
        time_ms: i64,
    ) -> Result<PromValue>;

    async fn range_query(
        &self,
        queryable: Arc<dyn Queryable>,
        promql: &str,
        start_ms: i64,
        end_ms: i64,
        step: Duration,
    ) -> Result<PromValue>;
}

/// Storage seam consumed by the engine
pub trait Queryable: Send + Sync {
    fn querier(&self, start_ms: i64, end_ms: i64) -> Result<Box<dyn Querier>>;
}

/// One query window over the storage seam
#[async_trait]
pub trait Querier: Send + Sync {
    async fn select(
        &self,
        sort_series: bool,
        hints: &SelectHints,
        matchers: &[LabelMatcher],
    ) -> Result<SeriesSet>;
}

/// Per-request debug stats, filled while selects run
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    #[serde(rename = "SQL")]
    pub sql: Vec<String>,
    /// Total SQL time in seconds
    pub query_time: f64,
}

/// `Queryable` backed by the remote-read translator and the columnar store
pub struct RemoteReadQueryable {
    translator: Arc<RemoteReadTranslator>,
    store: Arc<dyn ColumnarStore>,
    config: Arc<RwLock<Config>>,
    stats: Arc<Mutex<QueryStats>>,
}

impl Queryable for RemoteReadQueryable {
    fn querier(&self, start_ms: i64, end_ms: i64) -> Result<Box<dyn Querier>> {
        Ok(Box::new(RemoteReadQuerier {
            translator: self.translator.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            start_ms,
            end_ms,
        }))
    }
}

struct RemoteReadQuerier {
    translator: Arc<RemoteReadTranslator>,
    store: Arc<dyn ColumnarStore>,
    config: Arc<RwLock<Config>>,
    stats: Arc<Mutex<QueryStats>>,
    start_ms: i64,
    end_ms: i64,
}

#[async_trait]
impl Querier for RemoteReadQuerier {
    async fn select(
        &self,
        sort_series: bool,
        hints: &SelectHints,
        matchers: &[LabelMatcher],
    ) -> Result<SeriesSet> {
        let query = wire::Query {
            start_timestamp_ms: self.start_ms,
            end_timestamp_ms: self.end_ms,
            matchers: matchers.to_vec(),
            hints: Some(wire::ReadHints {
                step_ms: hints.step_ms,
                func: hints.func.clone(),
                start_ms: if hints.start_ms != 0 {
                    hints.start_ms
                } else {
                    self.start_ms
                },
                end_ms: if hints.end_ms != 0 {
                    hints.end_ms
                } else {
                    self.end_ms
                },
                grouping: hints.grouping.clone(),
                by: hints.by,
                range_ms: hints.range_ms,
            }),
        };

        let cfg = self.config.read().clone();
        let prepared = self.translator.translate(&cfg, &query)?;

        let started = Instant::now();
        let result = self.store.query(&prepared.sql).await?;
        {
            let mut stats = self.stats.lock();
            stats.sql.push(prepared.sql.clone());
            stats.query_time += started.elapsed().as_secs_f64();
        }

        let series = build_time_series(&cfg, prepared.prefix, &result)?;
        let set = SeriesSet { series };
        Ok(if sort_series { set.sorted() } else { set })
    }
}

/// Parameters of an instant or range query
#[derive(Debug, Clone, Default)]
pub struct PromQueryParams {
    pub promql: String,
    /// Unix-seconds float or RFC3339; the evaluation time for instant queries
    pub start_time: String,
    pub end_time: String,
    /// Seconds float or Prometheus duration string
    pub step: String,
    pub debug: bool,
}

/// Parameters of a series query
#[derive(Debug, Clone, Default)]
pub struct PromSeriesParams {
    pub matchers: Vec<String>,
    pub start_time: String,
    pub end_time: String,
}

/// Query response envelope
#[derive(Debug, Serialize)]
pub struct PromQueryResponse {
    pub status: String,
    pub data: PromQueryData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueryStats>,
}

#[derive(Debug, Serialize)]
pub struct PromQueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: PromValue,
}

const STATUS_SUCCESS: &str = "success";

/// Executor wrapping the external PromQL engine
pub struct PromExecutor {
    engine: Arc<dyn PromqlEngine>,
    translator: Arc<RemoteReadTranslator>,
    store: Arc<dyn ColumnarStore>,
    config: Arc<RwLock<Config>>,
}

impl PromExecutor {
    pub fn new(
        engine: Arc<dyn PromqlEngine>,
        store: Arc<dyn ColumnarStore>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        let qps_limit = config.read().qps_limit;
        Self {
            engine,
            translator: Arc::new(RemoteReadTranslator::new(qps_limit)),
            store,
            config,
        }
    }

    fn queryable(&self) -> (Arc<RemoteReadQueryable>, Arc<Mutex<QueryStats>>) {
        let stats = Arc::new(Mutex::new(QueryStats::default()));
        let queryable = Arc::new(RemoteReadQueryable {
            translator: self.translator.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            stats: stats.clone(),
        });
        (queryable, stats)
    }

    pub async fn instant_query(&self, params: &PromQueryParams) -> Result<PromQueryResponse> {
        let time_ms = parse_time(&params.start_time)?;
        let (queryable, stats) = self.queryable();
        let value = self
            .engine
            .instant_query(queryable, &params.promql, time_ms)
            .await
            .map_err(|e| {
                error!("instant query failed: {e}");
                e
            })?;
        Ok(self.respond(value, stats, params.debug))
    }

    pub async fn range_query(&self, params: &PromQueryParams) -> Result<PromQueryResponse> {
        let start_ms = parse_time(&params.start_time)?;
        let end_ms = parse_time(&params.end_time)?;
        let step = parse_duration(&params.step)?;
        let (queryable, stats) = self.queryable();
        let value = self
            .engine
            .range_query(queryable, &params.promql, start_ms, end_ms, step)
            .await
            .map_err(|e| {
                error!("range query failed: {e}");
                e
            })?;
        Ok(self.respond(value, stats, params.debug))
    }

    fn respond(
        &self,
        value: PromValue,
        stats: Arc<Mutex<QueryStats>>,
        debug: bool,
    ) -> PromQueryResponse {
        PromQueryResponse {
            status: STATUS_SUCCESS.to_string(),
            data: PromQueryData {
                result_type: value.result_type().to_string(),
                result: value,
            },
            stats: debug.then(|| stats.lock().clone()),
        }
    }

    /// Find series by label matchers. Multiple matcher sets are merged with
    /// a chained (deduplicating) merge.
    pub async fn series(
        &self,
        params: &PromSeriesParams,
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let start_ms = parse_time(&params.start_time)?;
        let end_ms = parse_time(&params.end_time)?;
        let matcher_sets = parse_matcher_sets(&params.matchers)?;

        let (queryable, _stats) = self.queryable();
        let querier = queryable.querier(start_ms, end_ms)?;
        let hints = SelectHints {
            start_ms,
            end_ms,
            // no samples are needed for series lookups
            func: FUNC_SERIES.to_string(),
            ..Default::default()
        };

        let set = if matcher_sets.len() > 1 {
            let mut sets = Vec::with_capacity(matcher_sets.len());
            for matchers in &matcher_sets {
                // sorted selects merge (deduplicate) cleanly
                sets.push(querier.select(true, &hints, matchers).await?);
            }
            SeriesSet::merge_chained(sets)
        } else {
            querier.select(false, &hints, &matcher_sets[0]).await?
        };

        Ok(set
            .series
            .into_iter()
            .map(|s| {
                s.labels
                    .into_iter()
                    .map(|l| (l.name, l.value))
                    .collect::<BTreeMap<_, _>>()
            })
            .collect())
    }

    /// Distinct values of one Prometheus-native label.
    pub async fn label_values(&self, label_name: &str) -> Result<Vec<String>> {
        if !label_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Parse(format!("invalid label name {label_name:?}")));
        }
        let cfg = self.config.read().clone();
        let sql = format!(
            "SELECT DISTINCT `tag.{label_name}` FROM {} LIMIT {}",
            crate::ingest::PROMETHEUS_TABLE,
            cfg.limit
        );
        let result = self.store.query(&sql).await?;
        Ok(result
            .values
            .iter()
            .filter_map(|row| row.first())
            .filter(|v| !matches!(v, crate::store::Value::Null))
            .map(|v| v.display())
            .collect())
    }

    /// Remote-read passthrough: translate, execute, reshape.
    pub async fn remote_read(&self, req: &wire::ReadRequest) -> Result<wire::ReadResponse> {
        let query = req.queries.first().ok_or_else(|| {
            Error::Parse("len(req.Queries) == 0, this feature is not yet implemented!".into())
        })?;
        let cfg = self.config.read().clone();
        let prepared = self.translator.translate(&cfg, query)?;
        let result = self.store.query(&prepared.sql).await?;
        let timeseries = build_time_series(&cfg, prepared.prefix, &result)?;
        Ok(wire::ReadResponse {
            results: vec![wire::QueryResult { timeseries }],
        })
    }
}

/// Parse a timestamp: Unix-seconds float or RFC3339-nano. Returns epoch ms.
pub fn parse_time(s: &str) -> Result<i64> {
    if let Ok(seconds) = s.parse::<f64>() {
        let ms = seconds * 1000.0;
        if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
            return Err(Error::Parse(format!(
                "cannot parse {s:?} to a valid timestamp"
            )));
        }
        return Ok(ms.round() as i64);
    }
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(t.timestamp_millis());
    }
    Err(Error::Parse(format!(
        "cannot parse {s:?} to a valid timestamp"
    )))
}

/// Parse a duration: seconds float or Prometheus duration string (`5m`,
/// `1h30m`).
pub fn parse_duration(s: &str) -> Result<Duration> {
    if let Ok(seconds) = s.parse::<f64>() {
        let ns = seconds * 1e9;
        if !ns.is_finite() || ns >= i64::MAX as f64 || ns <= i64::MIN as f64 {
            return Err(Error::Parse(format!(
                "cannot parse {s:?} to a valid duration. It overflows int64"
            )));
        }
        if seconds < 0.0 {
            return Err(Error::Parse(format!("cannot parse {s:?} to a valid duration")));
        }
        return Ok(Duration::from_secs_f64(seconds));
    }

    static DURATION_RE: OnceLock<Regex> = OnceLock::new();
    let re = DURATION_RE.get_or_init(|| {
        Regex::new(
            r"^(?:([0-9]+)y)?(?:([0-9]+)w)?(?:([0-9]+)d)?(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s)?(?:([0-9]+)ms)?$",
        )
        .expect("static regex")
    });
    let caps = re
        .captures(s)
        .filter(|c| c.iter().skip(1).any(|g| g.is_some()))
        .ok_or_else(|| Error::Parse(format!("cannot parse {s:?} to a valid duration")))?;

    const UNIT_MS: [u64; 7] = [
        365 * 24 * 3600 * 1000, // y
        7 * 24 * 3600 * 1000,   // w
        24 * 3600 * 1000,       // d
        3600 * 1000,            // h
        60 * 1000,              // m
        1000,                   // s
        1,                      // ms
    ];
    let mut total_ms: u64 = 0;
    for (i, unit) in UNIT_MS.iter().enumerate() {
        if let Some(group) = caps.get(i + 1) {
            let n: u64 = group
                .as_str()
                .parse()
                .map_err(|_| Error::Parse(format!("cannot parse {s:?} to a valid duration")))?;
            total_ms = total_ms
                .checked_add(n.saturating_mul(*unit))
                .ok_or_else(|| {
                    Error::Parse(format!(
                        "cannot parse {s:?} to a valid duration. It overflows int64"
                    ))
                })?;
        }
    }
    Ok(Duration::from_millis(total_ms))
}

/// Parse `match[]` selector strings into matcher sets.
pub fn parse_matcher_sets(selectors: &[String]) -> Result<Vec<Vec<LabelMatcher>>> {
    let mut sets = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let matchers = parse_selector(selector)?;
        if matchers.is_empty() {
            return Err(Error::Parse(
                "match[] must contain at least one non-empty matcher".into(),
            ));
        }
        sets.push(matchers);
    }
    if sets.is_empty() {
        return Err(Error::Parse(
            "match[] must contain at least one non-empty matcher".into(),
        ));
    }
    Ok(sets)
}

/// Parse a single series selector: `metric{label="value", ...}`.
fn parse_selector(selector: &str) -> Result<Vec<LabelMatcher>> {
    static SELECTOR_RE: OnceLock<Regex> = OnceLock::new();
    static MATCHER_RE: OnceLock<Regex> = OnceLock::new();
    let selector_re = SELECTOR_RE.get_or_init(|| {
        Regex::new(r"^\s*([a-zA-Z_:][a-zA-Z0-9_:]*)?\s*(?:\{(.*)\})?\s*$").expect("static regex")
    });
    let matcher_re = MATCHER_RE.get_or_init(|| {
        Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)\s*(=~|!=|!~|=)\s*"((?:[^"\\]|\\.)*)""#)
            .expect("static regex")
    });

    let caps = selector_re
        .captures(selector)
        .ok_or_else(|| Error::Parse(format!("invalid series selector {selector:?}")))?;

    let mut matchers = Vec::new();
    if let Some(name) = caps.get(1) {
        matchers.push(LabelMatcher::new(
            MatcherType::Eq,
            wire::METRIC_NAME_LABEL,
            name.as_str(),
        ));
    }
    if let Some(body) = caps.get(2) {
        for m in matcher_re.captures_iter(body.as_str()) {
            let matcher_type = match &m[2] {
                "=" => MatcherType::Eq,
                "!=" => MatcherType::Neq,
                "=~" => MatcherType::Re,
                "!~" => MatcherType::Nre,
                _ => unreachable!("operator set fixed by the regex"),
            };
            let value = m[3].replace("\\\"", "\"").replace("\\\\", "\\");
            matchers.push(LabelMatcher::new(matcher_type, &m[1], value));
        }
    }
    Ok(matchers)
}
