//! Sub-cache map types
//!
//! Each sub-cache wraps concurrent maps/sets (`DashMap`/`DashSet`): readers
//! proceed without blocking writers, writers see their own writes
//! immediately, and iteration is snapshot-like (it may miss concurrent
//! inserts but never yields torn entries). Refreshes upsert after all
//! system-of-record rows have been fetched; entries are never deleted, so
//! stale IDs persist until overwritten.

use crate::cache::registry::{
    LabelNameRecord, LabelRecord, LabelValueRecord, LayoutRecord, MetricLabelRecord,
    MetricNameRecord, MetricTargetRecord, TargetRecord,
};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::sync::Arc;

/// `metric name -> MetricID`
#[derive(Debug, Default)]
pub struct MetricNameCache {
    name_to_id: DashMap<String, u32>,
}

impl MetricNameCache {
    pub fn id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub(crate) fn apply(&self, records: Vec<MetricNameRecord>) {
        for r in records {
            self.name_to_id.insert(r.name, r.id);
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut name_to_id = serde_json::Map::new();
        for entry in self.name_to_id.iter() {
            name_to_id.insert(entry.key().clone(), (*entry.value()).into());
        }
        serde_json::json!({ "name_to_id": name_to_id })
    }
}

/// `label name -> LabelNameID`
#[derive(Debug, Default)]
pub struct LabelNameCache {
    name_to_id: DashMap<String, u32>,
}

impl LabelNameCache {
    pub fn id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).map(|v| *v)
    }

    pub(crate) fn apply(&self, records: Vec<LabelNameRecord>) {
        for r in records {
            self.name_to_id.insert(r.name, r.id);
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut name_to_id = serde_json::Map::new();
        for entry in self.name_to_id.iter() {
            name_to_id.insert(entry.key().clone(), (*entry.value()).into());
        }
        serde_json::json!({ "name_to_id": name_to_id })
    }
}

/// `label value -> LabelValueID`
#[derive(Debug, Default)]
pub struct LabelValueCache {
    value_to_id: DashMap<String, u32>,
}

impl LabelValueCache {
    pub fn id(&self, value: &str) -> Option<u32> {
        self.value_to_id.get(value).map(|v| *v)
    }

    pub(crate) fn apply(&self, records: Vec<LabelValueRecord>) {
        for r in records {
            self.value_to_id.insert(r.value, r.id);
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut value_to_id = serde_json::Map::new();
        for entry in self.value_to_id.iter() {
            value_to_id.insert(entry.key().clone(), (*entry.value()).into());
        }
        serde_json::json!({ "value_to_id": value_to_id })
    }
}

/// Layout key: which app-label column a label occupies for one metric
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LayoutKey {
    pub metric_name: String,
    pub app_label_name: String,
}

/// `(metric, app label name) -> column index`
#[derive(Debug, Default)]
pub struct LayoutCache {
    key_to_index: DashMap<LayoutKey, u32>,
}

impl LayoutCache {
    pub fn column_index(&self, metric_name: &str, app_label_name: &str) -> Option<u32> {
        // Borrowed composite lookups are not worth a custom key trait here;
        // layout lookups are off the hot path (once per series, not sample).
        let key = LayoutKey {
            metric_name: metric_name.to_string(),
            app_label_name: app_label_name.to_string(),
        };
        self.key_to_index.get(&key).map(|v| *v)
    }

    pub(crate) fn apply(&self, records: Vec<LayoutRecord>) {
        for r in records {
            self.key_to_index.insert(
                LayoutKey {
                    metric_name: r.metric_name,
                    app_label_name: r.app_label_name,
                },
                r.column_index,
            );
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut key_to_index = serde_json::Map::new();
        for entry in self.key_to_index.iter() {
            let key = serde_json::to_string(entry.key()).unwrap_or_default();
            key_to_index.insert(key, (*entry.value()).into());
        }
        serde_json::json!({ "layout_key_to_index": key_to_index })
    }
}

/// Target identity: the sorted (name, value) pairs of its target labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetKey {
    labels: Vec<(String, String)>,
}

impl TargetKey {
    /// Build a key from label pairs in any order.
    pub fn new(mut labels: Vec<(String, String)>) -> Self {
        labels.sort();
        Self { labels }
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }
}

/// `TargetKey -> TargetID` plus the set of target label names
#[derive(Debug, Default)]
pub struct TargetCache {
    key_to_id: DashMap<TargetKey, u32>,
    target_label_keys: DashSet<String>,
}

impl TargetCache {
    pub fn id(&self, key: &TargetKey) -> Option<u32> {
        self.key_to_id.get(key).map(|v| *v)
    }

    /// Whether a label name belongs to the target rather than the app.
    pub fn is_target_label(&self, name: &str) -> bool {
        self.target_label_keys.contains(name)
    }

    pub(crate) fn apply(&self, records: Vec<TargetRecord>) {
        for r in records {
            for (name, _) in &r.labels {
                self.target_label_keys.insert(name.clone());
            }
            self.key_to_id.insert(TargetKey::new(r.labels), r.id);
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut key_to_target_id = serde_json::Map::new();
        for entry in self.key_to_id.iter() {
            let key = serde_json::to_string(entry.key()).unwrap_or_default();
            key_to_target_id.insert(key, (*entry.value()).into());
        }
        let mut label_keys = serde_json::Map::new();
        for name in self.target_label_keys.iter() {
            label_keys.insert(name.clone(), serde_json::json!({}));
        }
        serde_json::json!({
            "key_to_target_id": key_to_target_id,
            "target_label_keys": label_keys,
        })
    }
}

/// A (name, value) label pair key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LabelKey {
    pub name: String,
    pub value: String,
}

/// Known label pairs and `LabelID -> pair`
#[derive(Debug, Default)]
pub struct LabelCache {
    keys: DashSet<LabelKey>,
    id_to_key: DashMap<u32, LabelKey>,
}

impl LabelCache {
    pub fn contains(&self, key: &LabelKey) -> bool {
        self.keys.contains(key)
    }

    pub fn key_of(&self, id: u32) -> Option<LabelKey> {
        self.id_to_key.get(&id).map(|v| v.clone())
    }

    pub(crate) fn apply(&self, records: Vec<LabelRecord>) {
        for r in records {
            let key = LabelKey {
                name: r.name,
                value: r.value,
            };
            self.keys.insert(key.clone());
            self.id_to_key.insert(r.id, key);
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut keys = serde_json::Map::new();
        for key in self.keys.iter() {
            let k = serde_json::to_string(&*key).unwrap_or_default();
            keys.insert(k, serde_json::json!({}));
        }
        let mut id_to_key = serde_json::Map::new();
        for entry in self.id_to_key.iter() {
            id_to_key.insert(
                entry.key().to_string(),
                serde_json::to_string(entry.value()).unwrap_or_default().into(),
            );
        }
        serde_json::json!({ "keys": keys, "id_to_key": id_to_key })
    }
}

/// `(metric, LabelID)` membership key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetricLabelKey {
    pub metric_name: String,
    pub label_id: u32,
}

/// Metric to label-ID associations; embeds the shared [`LabelCache`]
#[derive(Debug)]
pub struct MetricLabelCache {
    labels: Arc<LabelCache>,
    metric_name_to_label_ids: DashMap<String, Vec<u32>>,
    keys: DashSet<MetricLabelKey>,
}

impl MetricLabelCache {
    pub fn new(labels: Arc<LabelCache>) -> Self {
        Self {
            labels,
            metric_name_to_label_ids: DashMap::new(),
            keys: DashSet::new(),
        }
    }

    pub fn label_ids(&self, metric_name: &str) -> Option<Vec<u32>> {
        self.metric_name_to_label_ids
            .get(metric_name)
            .map(|v| v.clone())
    }

    pub fn contains(&self, key: &MetricLabelKey) -> bool {
        self.keys.contains(key)
    }

    /// Label pairs of a metric, resolved through the embedded label cache.
    pub fn labels_of(&self, metric_name: &str) -> Vec<LabelKey> {
        self.label_ids(metric_name)
            .map(|ids| ids.iter().filter_map(|id| self.labels.key_of(*id)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn apply(&self, records: Vec<MetricLabelRecord>) {
        for r in records {
            let key = MetricLabelKey {
                metric_name: r.metric_name.clone(),
                label_id: r.label_id,
            };
            if self.keys.insert(key) {
                self.metric_name_to_label_ids
                    .entry(r.metric_name)
                    .or_default()
                    .push(r.label_id);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut metric_to_ids = serde_json::Map::new();
        for entry in self.metric_name_to_label_ids.iter() {
            metric_to_ids.insert(
                entry.key().clone(),
                serde_json::json!(entry.value().clone()),
            );
        }
        let mut keys = serde_json::Map::new();
        for key in self.keys.iter() {
            keys.insert(
                serde_json::to_string(&*key).unwrap_or_default(),
                serde_json::json!({}),
            );
        }
        serde_json::json!({
            "label_cache": self.labels.snapshot(),
            "metric_name_to_label_ids": metric_to_ids,
            "metric_label_keys": keys,
        })
    }
}

/// `(MetricID, TargetID)` membership key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetricTargetKey {
    pub metric_id: u32,
    pub target_id: u32,
}

/// Metric/target associations; embeds the shared [`MetricNameCache`]
#[derive(Debug)]
pub struct MetricTargetCache {
    metric_names: Arc<MetricNameCache>,
    keys: DashSet<MetricTargetKey>,
    target_id_to_metric_ids: DashMap<u32, Vec<u32>>,
}

impl MetricTargetCache {
    pub fn new(metric_names: Arc<MetricNameCache>) -> Self {
        Self {
            metric_names,
            keys: DashSet::new(),
            target_id_to_metric_ids: DashMap::new(),
        }
    }

    pub fn contains(&self, key: &MetricTargetKey) -> bool {
        self.keys.contains(key)
    }

    pub fn metric_ids(&self, target_id: u32) -> Option<Vec<u32>> {
        self.target_id_to_metric_ids
            .get(&target_id)
            .map(|v| v.clone())
    }

    /// Whether a metric (by name) is associated with the target.
    pub fn metric_seen_on_target(&self, metric_name: &str, target_id: u32) -> bool {
        match self.metric_names.id(metric_name) {
            Some(metric_id) => self.contains(&MetricTargetKey {
                metric_id,
                target_id,
            }),
            None => false,
        }
    }

    pub(crate) fn apply(&self, records: Vec<MetricTargetRecord>) {
        for r in records {
            let key = MetricTargetKey {
                metric_id: r.metric_id,
                target_id: r.target_id,
            };
            if self.keys.insert(key) {
                self.target_id_to_metric_ids
                    .entry(r.target_id)
                    .or_default()
                    .push(r.metric_id);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> serde_json::Value {
        let mut keys = serde_json::Map::new();
        for key in self.keys.iter() {
            keys.insert(
                serde_json::to_string(&*key).unwrap_or_default(),
                serde_json::json!({}),
            );
        }
        let mut target_to_metrics = serde_json::Map::new();
        for entry in self.target_id_to_metric_ids.iter() {
            target_to_metrics.insert(
                entry.key().to_string(),
                serde_json::json!(entry.value().clone()),
            );
        }
        serde_json::json!({
            "metric_target_keys": keys,
            "target_id_to_metric_ids": target_to_metrics,
        })
    }
}
