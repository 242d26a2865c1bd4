//! SQL result to Prometheus time series
//!
//! Two passes over the result set. The first assigns every row to a series
//! via a structural dedup key and counts per-series samples so sample
//! vectors can be sized exactly. The second walks rows in reverse (SQL
//! output is timestamp-descending) and appends samples, so every series
//! comes out time-ascending for the PromQL engine.

use crate::config::Config;
use crate::query::remote_read::{
    format_tag_name, METRICS_PREFIX, NATIVE_TAG_COLUMN, TIME_COLUMN,
};
use crate::query::TagPrefix;
use crate::store::{QueryResult, Value, ValueType};
use crate::wire;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Series identity within one result set: the native-tag JSON plus every
/// platform tag column's (index, value) pair, zeros included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    tag_json: String,
    platform_tags: Vec<(usize, String)>,
}

/// Rebuild Prometheus series from a translated query's result set.
pub fn build_time_series(
    cfg: &Config,
    prefix: TagPrefix,
    result: &QueryResult,
) -> Result<Vec<wire::TimeSeries>> {
    let mut tag_index: Option<usize> = None;
    let mut metrics_index: Option<usize> = None;
    let mut time_index: Option<usize> = None;
    let mut is_tag_field = vec![false; result.columns.len()];
    let mut metric_name = String::new();

    for (i, column) in result.columns.iter().enumerate() {
        if column == NATIVE_TAG_COLUMN {
            tag_index = Some(i);
        } else if column.starts_with("tag.") {
            is_tag_field[i] = true;
        } else if let Some(rest) = column.strip_prefix(METRICS_PREFIX) {
            metrics_index = Some(i);
            metric_name = rest.to_string();
        } else if column == TIME_COLUMN {
            time_index = Some(i);
        }
    }

    let (metrics_index, time_index) = match (metrics_index, time_index) {
        (Some(m), Some(t)) => (m, t),
        _ => {
            return Err(Error::Execution(format!(
                "metrics column({metrics_index:?}) or timestamp column({time_index:?}) not found"
            )))
        }
    };
    let metrics_type = result.schemas[metrics_index];

    // The remaining columns are platform ("auto") tags.
    let platform_columns: Vec<usize> = (0..result.columns.len())
        .filter(|&i| {
            Some(i) != tag_index && i != metrics_index && i != time_index && !is_tag_field[i]
        })
        .collect();

    // First pass: assign each row a series slot and count samples per series,
    // respecting the series limit.
    let max_possible_series = result.values.len().min(cfg.series_limit);
    let mut series_index: HashMap<SeriesKey, i32> = HashMap::new();
    let mut series_list: Vec<wire::TimeSeries> = Vec::with_capacity(max_possible_series);
    let mut sample_series: Vec<i32> = Vec::with_capacity(result.values.len());
    let mut series_sample_count: Vec<usize> = Vec::with_capacity(max_possible_series);

    for row in &result.values {
        let key = SeriesKey {
            tag_json: tag_index.map(|i| row[i].display()).unwrap_or_default(),
            platform_tags: platform_columns.iter().map(|&i| (i, row[i].display())).collect(),
        };

        if let Some(&index) = series_index.get(&key) {
            sample_series.push(index);
            series_sample_count[index as usize] += 1;
            continue;
        }
        if series_index.len() >= cfg.series_limit {
            // series overflow: the row is dropped in the second pass
            sample_series.push(-1);
            continue;
        }

        let mut labels: Vec<wire::Label> = Vec::new();
        if let Some(i) = tag_index {
            let tag_map: BTreeMap<String, String> =
                serde_json::from_str(&row[i].display()).unwrap_or_default();
            for (name, value) in tag_map {
                let name = if prefix == TagPrefix::Native {
                    format!("tag_{name}")
                } else {
                    name
                };
                labels.push(wire::Label { name, value });
            }
        }
        for &i in &platform_columns {
            if cfg.elide_zero_tags && row[i].is_zero() {
                continue;
            }
            let mut name = format_tag_name(&result.columns[i]);
            if tag_index.is_some() && prefix == TagPrefix::Auto {
                name = format!("{}{name}", cfg.auto_tagging_prefix);
            }
            labels.push(wire::Label {
                name,
                value: row[i].display(),
            });
        }
        labels.push(wire::Label {
            name: wire::METRIC_NAME_LABEL.to_string(),
            value: metric_name.clone(),
        });

        let index = series_list.len() as i32;
        series_list.push(wire::TimeSeries {
            labels,
            samples: Vec::new(),
        });
        series_sample_count.push(1);
        series_index.insert(key, index);
        sample_series.push(index);
    }

    // Second pass, in reverse row order so samples emerge time-ascending.
    for (i, row) in result.values.iter().enumerate().rev() {
        let index = sample_series[i];
        if index < 0 {
            continue;
        }

        let cell = &row[metrics_index];
        if matches!(cell, Value::Null) {
            continue;
        }
        let value = match metrics_type {
            ValueType::Int => cell.as_i64().ok_or_else(|| {
                Error::Execution(format!("metrics cell is not an integer: {cell:?}"))
            })? as f64,
            ValueType::Float64 => match cell {
                Value::Float64(v) => *v,
                other => {
                    return Err(Error::Execution(format!(
                        "metrics cell is not a float: {other:?}"
                    )))
                }
            },
            other => {
                return Err(Error::Execution(format!(
                    "unknown metrics type {other:?}, value = {cell:?}"
                )))
            }
        };
        let timestamp = row[time_index].as_i64().ok_or_else(|| {
            Error::Execution(format!(
                "timestamp cell is not an integer: {:?}",
                row[time_index]
            ))
        })?;

        let series = &mut series_list[index as usize];
        if series.samples.capacity() == 0 {
            series
                .samples
                .reserve_exact(series_sample_count[index as usize]);
        }
        series.samples.push(wire::Sample {
            timestamp: timestamp * 1000,
            value,
        });
    }

    Ok(series_list)
}
