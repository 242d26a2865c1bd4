//! Remote read to SQL translation
//!
//! A remote-read query carries label matchers and aggregation hints; this
//! module turns one into a single SQL statement. The `__name__` matcher
//! routes the query: composite names (`db__table__metric[__precision]`)
//! address the platform's own databases, bare names address the Prometheus
//! sample table. Output is always ordered by timestamp descending so the
//! response builder can assemble samples time-ascending in one reverse scan.

use crate::config::Config;
use crate::query::TagPrefix;
use crate::rate_limit::{LeakyBucket, TOKENS_PER_QUERY};
use crate::wire::{self, LabelMatcher, MatcherType};
use crate::{Error, Result};

/// Timestamp alias used by every generated projection.
pub const TIME_COLUMN: &str = "timestamp";
/// JSON column carrying the Prometheus-native tags.
pub const NATIVE_TAG_COLUMN: &str = "tag";
/// Prefix marking the metric column in projections.
pub const METRICS_PREFIX: &str = "metrics.";

/// Synthetic aggregation hint used by series lookups; such queries skip
/// aggregation entirely (no samples are materialized downstream).
pub const FUNC_SERIES: &str = "series";

pub const DB_FLOW_LOG: &str = "flow_log";
pub const DB_FLOW_METRICS: &str = "flow_metrics";
pub const DB_EXT_METRICS: &str = "ext_metrics";
pub const DB_DEEPFLOW_SYSTEM: &str = "deepflow_system";
pub const DB_PROMETHEUS: &str = "prometheus";

const KNOWN_DBS: [&str; 5] = [
    DB_FLOW_LOG,
    DB_FLOW_METRICS,
    DB_EXT_METRICS,
    DB_DEEPFLOW_SYSTEM,
    DB_PROMETHEUS,
];

/// Rules rewriting Prometheus-safe matcher names back to querier tag names.
const MATCHER_RULES: [(&str, &str); 2] = [
    ("k8s_label_", "k8s.label."),
    ("cloud_tag_", "cloud.tag."),
];

/// How the metric column is aliased in the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricAlias {
    /// `value as \`metrics.{name}\`` (sample tables)
    Value,
    /// `metrics.{name}` (tables whose metric columns already carry the prefix)
    Bare,
    /// `{expr} as \`metrics.{name}\`` (native metrics tables)
    Expr,
}

impl MetricAlias {
    fn project(&self, expr: &str, name: &str) -> String {
        match self {
            MetricAlias::Value => format!("value as `{METRICS_PREFIX}{name}`"),
            MetricAlias::Bare => format!("{METRICS_PREFIX}{name}"),
            MetricAlias::Expr => format!("{expr} as `{METRICS_PREFIX}{name}`"),
        }
    }
}

#[derive(Debug, Clone)]
struct ParsedMetric {
    prefix: TagPrefix,
    metric_name: String,
    /// Empty for native Prometheus metrics
    db: String,
    table: String,
    data_precision: Option<String>,
    alias: MetricAlias,
}

/// A translated query, ready for the columnar store
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub sql: String,
    pub db: String,
    pub table: String,
    pub metric_name: String,
    pub data_precision: Option<String>,
    /// Tag prefix mode the response builder must apply
    pub prefix: TagPrefix,
}

/// Translates remote-read queries into SQL, with admission control
pub struct RemoteReadTranslator {
    limiter: LeakyBucket,
}

impl RemoteReadTranslator {
    pub fn new(qps_limit: u64) -> Self {
        Self {
            limiter: LeakyBucket::new(qps_limit),
        }
    }

    /// Translate one query. Consumes one admission token up front; a
    /// rejected query does no further work.
    pub fn translate(&self, cfg: &Config, query: &wire::Query) -> Result<PreparedQuery> {
        if !self.limiter.acquire(TOKENS_PER_QUERY) {
            return Err(Error::RateExceeded);
        }

        let hints = query.hints.clone().unwrap_or_default();
        let start_time = hints.start_ms / 1000;
        let mut end_time = hints.end_ms / 1000;
        if query.end_timestamp_ms % 1000 > 0 {
            end_time += 1;
        }

        let parsed = parse_metric(&query.matchers)?;
        let is_series_query = hints.func == FUNC_SERIES;

        let mut metrics: Vec<String> =
            vec![format!("toUnixTimestamp(time) AS {TIME_COLUMN}")];
        let mut group_by: Vec<String> = Vec::new();
        let mut metric_with_agg: Option<String> = None;

        let sample_style_db = parsed.db.is_empty()
            || parsed.db == DB_EXT_METRICS
            || parsed.db == DB_DEEPFLOW_SYSTEM
            || parsed.db == DB_PROMETHEUS;

        if !sample_style_db && !is_series_query {
            // Native metrics tables are only queryable through aggregation.
            if hints.grouping.is_empty() {
                return Err(Error::Translation("unknown series".into()));
            }
            if !hints.by {
                return Err(Error::Translation(
                    "not support for 'without' clause for aggregation".into(),
                ));
            }
            let operator = agg_operator(&hints.func).ok_or_else(|| {
                Error::Translation(format!(
                    "aggregation operator: {} is not supported yet",
                    hints.func
                ))
            })?;

            if hints.step_ms > 0 {
                // Range query: align the time projection to the step.
                metrics[0] = format!("time(time, {}) AS {TIME_COLUMN}", hints.step_ms / 1000);
            }

            // Instant queries aggregate to a single timestamp point.
            group_by.reserve(hints.grouping.len() + 1);
            group_by.push(TIME_COLUMN.to_string());
            for group_label in &hints.grouping {
                let label = format!("`{}`", to_querier_tag_name(group_label));
                group_by.push(label.clone());
                metrics.push(label);
            }

            metric_with_agg = Some(match operator {
                "1" => operator.to_string(),
                "Count" => {
                    if parsed.db != DB_FLOW_LOG {
                        return Err(Error::Translation(
                            "only supported Count for flow_log".into(),
                        ));
                    }
                    // count_values counts distinct values: the metric column
                    // joins both projection and grouping.
                    if hints.func == "count_values" {
                        metrics.push(format!("`{}`", parsed.metric_name));
                        group_by.push(format!("`{}`", parsed.metric_name));
                    }
                    "Sum(`log_count`)".to_string()
                }
                _ => format!("{operator}(`{}`)", parsed.metric_name),
            });
        }

        if sample_style_db {
            metrics.push(parsed.alias.project(&parsed.metric_name, &parsed.metric_name));
            metrics.push(format!("`{NATIVE_TAG_COLUMN}`"));
        } else if let Some(agg_expr) = &metric_with_agg {
            metrics.push(parsed.alias.project(agg_expr, &parsed.metric_name));
        } else {
            // Series lookups project the raw metric column.
            metrics.push(parsed.alias.project(&parsed.metric_name, &parsed.metric_name));
        }

        let mut filters = vec![format!("(time >= {start_time} AND time <= {end_time})")];
        for matcher in &query.matchers {
            if matcher.name == wire::METRIC_NAME_LABEL {
                continue;
            }
            let operation = matcher_operation(matcher)?;
            let value = escape_value(&matcher.value);

            if parsed.db.is_empty() || parsed.db == DB_DEEPFLOW_SYSTEM {
                if let Some(rest) = matcher.name.strip_prefix(cfg.auto_tagging_prefix.as_str()) {
                    let tag_name = to_querier_tag_name(rest);
                    filters.push(format!("`{tag_name}` {operation} '{value}'"));
                    // A mentioned platform tag joins the projection so the
                    // response carries it.
                    if cfg.request_query_with_debug {
                        metrics.push(tag_name);
                    }
                } else {
                    filters.push(format!(
                        "`tag.{}` {operation} '{value}'",
                        matcher.name
                    ));
                    metrics.push(format!("`tag.{}`", matcher.name));
                }
            } else if let Some(rest) = matcher.name.strip_prefix("tag_") {
                filters.push(format!("`tag.{rest}` {operation} '{value}'"));
                if cfg.request_query_with_debug {
                    metrics.push(format!("`tag.{rest}`"));
                }
            } else {
                let tag_name = to_querier_tag_name(&matcher.name);
                filters.push(format!("`{tag_name}` {operation} '{value}'"));
            }
        }

        let sql = if parsed.db.is_empty() {
            format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {TIME_COLUMN} desc LIMIT {}",
                metrics.join(","),
                parsed.table,
                filters.join(" AND "),
                cfg.limit
            )
        } else {
            let mut sql = format!(
                "SELECT {} FROM {} WHERE {} ",
                metrics.join(","),
                parsed.table,
                filters.join(" AND ")
            );
            if !group_by.is_empty() {
                sql.push_str(&format!("GROUP BY {}", group_by.join(",")));
            }
            sql.push_str(&format!(
                " ORDER BY {TIME_COLUMN} desc LIMIT {}",
                cfg.limit
            ));
            sql
        };

        Ok(PreparedQuery {
            sql,
            db: parsed.db,
            table: parsed.table,
            metric_name: parsed.metric_name,
            data_precision: parsed.data_precision,
            prefix: parsed.prefix,
        })
    }
}

/// Resolve the `__name__` matcher into database routing and metric aliasing.
fn parse_metric(matchers: &[LabelMatcher]) -> Result<ParsedMetric> {
    let name_matcher = matchers
        .iter()
        .find(|m| m.name == wire::METRIC_NAME_LABEL)
        .ok_or_else(|| Error::Parse("no __name__ matcher in query".into()))?;
    let raw_name = name_matcher.value.clone();

    if !raw_name.contains("__") {
        // Native Prometheus metric: table per metric in the sample database,
        // platform tags prefixed in responses.
        return Ok(ParsedMetric {
            prefix: TagPrefix::Auto,
            table: raw_name.clone(),
            metric_name: raw_name,
            db: String::new(),
            data_precision: None,
            alias: MetricAlias::Value,
        });
    }

    // Composite names:
    //   flow_log__l4_flow_log__byte_rx
    //   flow_metrics__vtap_flow_port__byte_rx__1m
    //   ext_metrics__metrics__prometheus_node_cpu_seconds_total
    //   prometheus__samples__node_cpu_seconds_total
    let parts: Vec<&str> = raw_name.split("__").collect();
    if parts.len() < 3 || !KNOWN_DBS.contains(&parts[0]) {
        return Err(Error::Parse(format!("unknown metrics {raw_name}")));
    }
    let db = parts[0].to_string();
    let mut table = parts[1].to_string();
    let mut metric_name = parts[2].to_string();
    let mut prefix = TagPrefix::None;

    let alias = match db.as_str() {
        DB_DEEPFLOW_SYSTEM => MetricAlias::Bare,
        DB_EXT_METRICS => {
            prefix = TagPrefix::Native;
            // Integrated metrics encode their source in the first name
            // segment: prometheus_node_cpu -> table prometheus.node_cpu.
            if let Some((source, rest)) = metric_name.split_once('_') {
                table = format!("{source}.{rest}");
                metric_name = rest.to_string();
            }
            MetricAlias::Bare
        }
        DB_PROMETHEUS => {
            prefix = TagPrefix::Native;
            table = metric_name.clone();
            MetricAlias::Value
        }
        _ => MetricAlias::Expr,
    };

    // Data precision is only carried by flow metrics names.
    let data_precision = parts.get(3).map(|p| p.to_string());

    Ok(ParsedMetric {
        prefix,
        metric_name,
        db,
        table,
        data_precision,
        alias,
    })
}

fn agg_operator(func: &str) -> Option<&'static str> {
    match func {
        "sum" => Some("Sum"),
        "avg" => Some("Avg"),
        "count" => Some("Count"),
        "min" => Some("Min"),
        "max" => Some("Max"),
        "stddev" => Some("Stddev"),
        // all values in the resulting vector are 1
        "group" => Some("1"),
        "count_values" => Some("Count"),
        _ => None,
    }
}

fn matcher_operation(matcher: &LabelMatcher) -> Result<&'static str> {
    match matcher.matcher_type() {
        Some(MatcherType::Eq) => Ok("="),
        Some(MatcherType::Neq) => Ok("!="),
        Some(MatcherType::Re) => Ok("REGEXP"),
        Some(MatcherType::Nre) => Ok("NOT REGEXP"),
        None => Err(Error::Parse(format!(
            "unknown match type {}",
            matcher.r#type
        ))),
    }
}

/// Rewrite a Prometheus-safe matcher name to the querier's tag name.
pub fn to_querier_tag_name(name: &str) -> String {
    for (rule_prefix, replacement) in MATCHER_RULES {
        if let Some(rest) = name.strip_prefix(rule_prefix) {
            return format!("{replacement}{rest}");
        }
    }
    name.to_string()
}

/// Normalise a querier tag name into a Prometheus-safe label name.
pub fn format_tag_name(name: &str) -> String {
    name.replace(['.', '-', '/'], "_")
}

fn escape_value(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_matcher(value: &str) -> LabelMatcher {
        LabelMatcher::new(MatcherType::Eq, wire::METRIC_NAME_LABEL, value)
    }

    #[test]
    fn test_parse_native_prometheus_metric() {
        let parsed = parse_metric(&[name_matcher("up")]).unwrap();
        assert_eq!(parsed.prefix, TagPrefix::Auto);
        assert_eq!(parsed.db, "");
        assert_eq!(parsed.table, "up");
        assert_eq!(parsed.alias.project("", "up"), "value as `metrics.up`");
    }

    #[test]
    fn test_parse_flow_metrics_with_precision() {
        let parsed =
            parse_metric(&[name_matcher("flow_metrics__vtap_flow_port__byte_rx__1m")]).unwrap();
        assert_eq!(parsed.db, DB_FLOW_METRICS);
        assert_eq!(parsed.table, "vtap_flow_port");
        assert_eq!(parsed.metric_name, "byte_rx");
        assert_eq!(parsed.data_precision.as_deref(), Some("1m"));
        assert_eq!(parsed.prefix, TagPrefix::None);
    }

    #[test]
    fn test_parse_ext_metrics_splits_source() {
        let parsed = parse_metric(&[name_matcher(
            "ext_metrics__metrics__prometheus_node_cpu_seconds_total",
        )])
        .unwrap();
        assert_eq!(parsed.table, "prometheus.node_cpu_seconds_total");
        assert_eq!(parsed.metric_name, "node_cpu_seconds_total");
        assert_eq!(parsed.prefix, TagPrefix::Native);
    }

    #[test]
    fn test_parse_prometheus_db_routes_to_metric_table() {
        let parsed =
            parse_metric(&[name_matcher("prometheus__samples__node_load1")]).unwrap();
        assert_eq!(parsed.db, DB_PROMETHEUS);
        assert_eq!(parsed.table, "node_load1");
        assert_eq!(parsed.prefix, TagPrefix::Native);
    }

    #[test]
    fn test_parse_unknown_db_rejected() {
        let err = parse_metric(&[name_matcher("nosuch__table__metric")]).unwrap_err();
        assert!(err.to_string().contains("unknown metrics"));
    }

    #[test]
    fn test_tag_name_rules() {
        assert_eq!(to_querier_tag_name("k8s_label_app"), "k8s.label.app");
        assert_eq!(to_querier_tag_name("cloud_tag_env"), "cloud.tag.env");
        assert_eq!(to_querier_tag_name("region"), "region");
        assert_eq!(format_tag_name("k8s.label/app-name"), "k8s_label_app_name");
    }
}
