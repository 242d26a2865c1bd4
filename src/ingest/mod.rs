//! Ingest path for Prometheus remote write
//!
//! The flow for one incoming series:
//! - resolve label strings to integer IDs through the ID cache
//! - build fixed-width [`Sample`] rows, slot 0 reserved for the target
//! - hand homogeneous batches to the [`SampleWriter`], which owns per-width
//!   batchers and online schema widening
//! - record newly observed tag pairs through the flow tag writer

mod batcher;
mod flow_tag;
mod sample;
mod writer;

pub use flow_tag::{FlowTagWriter, FIELD_TABLE, FIELD_VALUE_TABLE};
pub use sample::{
    Column, Sample, TableSchema, APP_LABEL_COLUMN_PREFIX, MAX_APP_LABEL_COLUMN_INDEX,
    PROMETHEUS_DB, PROMETHEUS_TABLE,
};
pub use writer::{SampleWriter, WriterCounters};

use crate::cache::{IdCache, TargetKey};
use crate::wire;

/// One remote-write series resolved against the ID cache.
pub struct ResolvedSeries {
    pub metric_name: String,
    /// Samples of this series, all sharing the same app-label width
    pub samples: Vec<Sample>,
    /// Label name IDs, parallel to the series' wire labels
    pub label_name_ids: Vec<u32>,
    /// Label value IDs, parallel to the series' wire labels
    pub label_value_ids: Vec<u32>,
}

/// Resolve a wire series into sample rows. Returns `None` when the metric,
/// its target, or the layout is not yet known to the cache: IDs are assigned
/// asynchronously by the system of record, and the upstream queue will
/// re-present the data once they exist.
pub fn resolve_series(cache: &IdCache, series: &wire::TimeSeries) -> Option<ResolvedSeries> {
    let metric_name = series.metric_name()?.to_string();
    let metric_id = cache.metric_name.id(&metric_name)?;

    let mut target_labels: Vec<(String, String)> = Vec::new();
    let mut app_label_value_ids = vec![0u32];
    let mut label_name_ids = Vec::with_capacity(series.labels.len());
    let mut label_value_ids = Vec::with_capacity(series.labels.len());

    for label in &series.labels {
        label_name_ids.push(cache.label_name.id(&label.name).unwrap_or(0));
        label_value_ids.push(cache.label_value.id(&label.value).unwrap_or(0));

        if label.name == wire::METRIC_NAME_LABEL {
            continue;
        }
        if cache.target.is_target_label(&label.name) {
            target_labels.push((label.name.clone(), label.value.clone()));
            continue;
        }

        // App label: place its value ID at the layout's column index.
        let index = cache.layout.column_index(&metric_name, &label.name)?;
        let value_id = cache.label_value.id(&label.value)?;
        if index as usize >= app_label_value_ids.len() {
            app_label_value_ids.resize(index as usize + 1, 0);
        }
        app_label_value_ids[index as usize] = value_id;
    }

    let target_id = cache.target.id(&TargetKey::new(target_labels))?;

    let samples = series
        .samples
        .iter()
        .map(|s| Sample {
            timestamp_ms: s.timestamp,
            metric_id,
            target_id,
            value: s.value,
            value_type: 0,
            app_label_value_ids: app_label_value_ids.clone(),
        })
        .collect();

    Some(ResolvedSeries {
        metric_name,
        samples,
        label_name_ids,
        label_value_ids,
    })
}
