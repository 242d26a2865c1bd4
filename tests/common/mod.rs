//! Shared test doubles: an in-memory columnar store that simulates the
//! catalog, a connector over it, a canned system-of-record registry, and a
//! stub PromQL engine that evaluates bare selectors.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use promlith::cache::{
    IdRegistry, LabelNameRecord, LabelRecord, LabelValueRecord, LayoutRecord, MetricLabelRecord,
    MetricNameRecord, MetricTargetRecord, TargetRecord,
};
use promlith::query::promql::{
    parse_matcher_sets, InstantSeries, PromValue, PromqlEngine, Queryable, RangeSeries,
    SelectHints,
};
use promlith::store::{
    ColumnarConnector, ColumnarStore, Endpoint, QueryResult, Value,
};
use promlith::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// In-memory columnar store. Tracks executed DDL, simulates the
/// `system.columns` catalog for the sample table, and serves canned query
/// results matched by SQL substring.
#[derive(Default)]
pub struct MemoryStore {
    pub executed: Mutex<Vec<String>>,
    pub queries: Mutex<Vec<String>>,
    pub inserts: Mutex<Vec<InsertRecord>>,
    /// App label column indices present on the sample table
    pub app_columns: Mutex<BTreeSet<usize>>,
    tables: Mutex<BTreeSet<String>>,
    responses: Mutex<Vec<(String, QueryResult)>>,
}

#[derive(Debug, Clone)]
pub struct InsertRecord {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl MemoryStore {
    pub fn respond_to(&self, sql_substring: &str, result: QueryResult) {
        self.responses
            .lock()
            .push((sql_substring.to_string(), result));
    }

    pub fn app_column_count(&self) -> usize {
        self.app_columns.lock().len()
    }

    /// Pretend a table already exists with the given app label columns, as
    /// if another node created it.
    pub fn seed_table(&self, table: &str, columns: &[usize]) {
        self.tables.lock().insert(table.to_string());
        self.app_columns.lock().extend(columns.iter().copied());
    }

    pub fn alter_count(&self) -> usize {
        self.executed
            .lock()
            .iter()
            .filter(|sql| sql.starts_with("ALTER TABLE"))
            .count()
    }

    fn app_indices_in(sql: &str) -> Vec<usize> {
        let mut indices = Vec::new();
        let mut rest = sql;
        while let Some(pos) = rest.find("app_label_value_id_") {
            rest = &rest[pos + "app_label_value_id_".len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(i) = digits.parse() {
                indices.push(i);
            }
        }
        indices
    }
}

#[async_trait]
impl ColumnarStore for MemoryStore {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.executed.lock().push(sql.to_string());

        if sql.starts_with("CREATE TABLE IF NOT EXISTS") {
            // first creation instantiates the columns named in the DDL
            let table = sql
                .split('`')
                .nth(1)
                .unwrap_or_default()
                .to_string();
            if self.tables.lock().insert(table) {
                let mut columns = self.app_columns.lock();
                for i in Self::app_indices_in(sql) {
                    columns.insert(i);
                }
            }
        } else if sql.starts_with("ALTER TABLE") {
            let mut columns = self.app_columns.lock();
            for i in Self::app_indices_in(sql) {
                if !columns.insert(i) {
                    return Err(Error::Store(
                        "column with this name already exists".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.queries.lock().push(sql.to_string());

        if sql.contains("FROM system.columns") {
            return Ok(QueryResult {
                columns: vec!["count(0)".into()],
                schemas: vec![promlith::store::ValueType::Int],
                values: vec![vec![Value::Int(self.app_column_count() as i64)]],
            });
        }
        for (pattern, result) in self.responses.lock().iter() {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }
        Err(Error::Store(format!("no canned response for: {sql}")))
    }

    async fn insert(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<()> {
        self.inserts.lock().push(InsertRecord {
            database: database.into(),
            table: table.into(),
            columns: columns.to_vec(),
            rows: rows.to_vec(),
        });
        Ok(())
    }
}

/// Connector mapping endpoints to in-memory stores; unknown endpoints fail
/// to dial.
#[derive(Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn with_store(endpoint: &Endpoint, store: Arc<MemoryStore>) -> Self {
        let connector = Self::default();
        connector.add(endpoint, store);
        connector
    }

    pub fn add(&self, endpoint: &Endpoint, store: Arc<MemoryStore>) {
        self.stores.lock().insert(endpoint.to_string(), store);
    }
}

#[async_trait]
impl ColumnarConnector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ColumnarStore>> {
        self.stores
            .lock()
            .get(&endpoint.to_string())
            .cloned()
            .map(|s| s as Arc<dyn ColumnarStore>)
            .ok_or_else(|| Error::Store(format!("dial {endpoint} refused")))
    }
}

/// Canned system of record with per-call event tracking
#[derive(Default)]
pub struct MockRegistry {
    pub metric_names: Vec<MetricNameRecord>,
    pub label_names: Vec<LabelNameRecord>,
    pub label_values: Vec<LabelValueRecord>,
    pub labels: Vec<LabelRecord>,
    pub layouts: Vec<LayoutRecord>,
    pub targets: Vec<TargetRecord>,
    pub metric_labels: Vec<MetricLabelRecord>,
    pub metric_targets: Vec<MetricTargetRecord>,
    /// Method names that should fail
    pub fail: Mutex<BTreeSet<&'static str>>,
    /// Artificial latency per call
    pub delay: Duration,
    /// `"<method>:start"` / `"<method>:end"` in observed order
    pub events: Mutex<Vec<String>>,
}

impl MockRegistry {
    /// A registry populated with one metric (`up`, id 1), one target
    /// (`job=node, instance=h1`, id 3) and a layout placing `pod` in app
    /// label column 1.
    pub fn populated() -> Self {
        Self {
            metric_names: vec![MetricNameRecord {
                id: 1,
                name: "up".into(),
            }],
            label_names: vec![
                LabelNameRecord {
                    id: 1,
                    name: "job".into(),
                },
                LabelNameRecord {
                    id: 2,
                    name: "instance".into(),
                },
                LabelNameRecord {
                    id: 3,
                    name: "pod".into(),
                },
            ],
            label_values: vec![
                LabelValueRecord {
                    id: 10,
                    value: "node".into(),
                },
                LabelValueRecord {
                    id: 11,
                    value: "h1".into(),
                },
                LabelValueRecord {
                    id: 12,
                    value: "pod-0".into(),
                },
            ],
            labels: vec![LabelRecord {
                id: 100,
                name: "pod".into(),
                value: "pod-0".into(),
            }],
            layouts: vec![LayoutRecord {
                metric_name: "up".into(),
                app_label_name: "pod".into(),
                column_index: 1,
            }],
            targets: vec![TargetRecord {
                id: 3,
                labels: vec![
                    ("job".into(), "node".into()),
                    ("instance".into(), "h1".into()),
                ],
            }],
            metric_labels: vec![MetricLabelRecord {
                metric_name: "up".into(),
                label_id: 100,
            }],
            metric_targets: vec![MetricTargetRecord {
                metric_id: 1,
                target_id: 3,
            }],
            ..Default::default()
        }
    }

    async fn call<T: Clone>(&self, method: &'static str, data: &[T]) -> Result<Vec<T>> {
        self.events.lock().push(format!("{method}:start"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self.fail.lock().contains(method);
        self.events.lock().push(format!("{method}:end"));
        if failed {
            return Err(Error::Store(format!("{method} unavailable")));
        }
        Ok(data.to_vec())
    }
}

#[async_trait]
impl IdRegistry for MockRegistry {
    async fn metric_names(&self) -> Result<Vec<MetricNameRecord>> {
        self.call("metric_names", &self.metric_names).await
    }
    async fn label_names(&self) -> Result<Vec<LabelNameRecord>> {
        self.call("label_names", &self.label_names).await
    }
    async fn label_values(&self) -> Result<Vec<LabelValueRecord>> {
        self.call("label_values", &self.label_values).await
    }
    async fn labels(&self) -> Result<Vec<LabelRecord>> {
        self.call("labels", &self.labels).await
    }
    async fn layouts(&self) -> Result<Vec<LayoutRecord>> {
        self.call("layouts", &self.layouts).await
    }
    async fn targets(&self) -> Result<Vec<TargetRecord>> {
        self.call("targets", &self.targets).await
    }
    async fn metric_labels(&self) -> Result<Vec<MetricLabelRecord>> {
        self.call("metric_labels", &self.metric_labels).await
    }
    async fn metric_targets(&self) -> Result<Vec<MetricTargetRecord>> {
        self.call("metric_targets", &self.metric_targets).await
    }
}

/// PromQL engine stub: treats the query as a bare series selector and
/// evaluates it with a single select.
pub struct StubEngine;

#[async_trait]
impl PromqlEngine for StubEngine {
    async fn instant_query(
        &self,
        queryable: Arc<dyn Queryable>,
        promql: &str,
        time_ms: i64,
    ) -> Result<PromValue> {
        let matchers = parse_matcher_sets(&[promql.to_string()])?.remove(0);
        let querier = queryable.querier(time_ms, time_ms)?;
        let hints = SelectHints {
            start_ms: time_ms,
            end_ms: time_ms,
            ..Default::default()
        };
        let set = querier.select(true, &hints, &matchers).await?;

        let mut result = Vec::new();
        for series in set.series {
            let metric: BTreeMap<String, String> = series
                .labels
                .iter()
                .map(|l| (l.name.clone(), l.value.clone()))
                .collect();
            if let Some(sample) = series.samples.last() {
                result.push(InstantSeries {
                    metric,
                    value: (sample.timestamp as f64 / 1000.0, sample.value.to_string()),
                });
            }
        }
        Ok(PromValue::Vector(result))
    }

    async fn range_query(
        &self,
        queryable: Arc<dyn Queryable>,
        promql: &str,
        start_ms: i64,
        end_ms: i64,
        step: Duration,
    ) -> Result<PromValue> {
        let matchers = parse_matcher_sets(&[promql.to_string()])?.remove(0);
        let querier = queryable.querier(start_ms, end_ms)?;
        let hints = SelectHints {
            start_ms,
            end_ms,
            step_ms: step.as_millis() as i64,
            ..Default::default()
        };
        let set = querier.select(true, &hints, &matchers).await?;

        let mut result = Vec::new();
        for series in set.series {
            let metric: BTreeMap<String, String> = series
                .labels
                .iter()
                .map(|l| (l.name.clone(), l.value.clone()))
                .collect();
            result.push(RangeSeries {
                metric,
                values: series
                    .samples
                    .iter()
                    .map(|s| (s.timestamp as f64 / 1000.0, s.value.to_string()))
                    .collect(),
            });
        }
        Ok(PromValue::Matrix(result))
    }
}

/// A canned result shaped like an instant query against a native Prometheus
/// metric: `timestamp`, `metrics.<name>`, `tag`.
pub fn native_metric_result(metric: &str, rows: Vec<(i64, f64, &str)>) -> QueryResult {
    QueryResult {
        columns: vec![
            "timestamp".into(),
            format!("metrics.{metric}"),
            "tag".into(),
        ],
        schemas: vec![
            promlith::store::ValueType::Int,
            promlith::store::ValueType::Float64,
            promlith::store::ValueType::String,
        ],
        values: rows
            .into_iter()
            .map(|(t, v, tag)| {
                vec![
                    Value::Int(t),
                    Value::Float64(v),
                    Value::String(tag.to_string()),
                ]
            })
            .collect(),
    }
}
