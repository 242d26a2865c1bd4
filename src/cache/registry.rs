//! System-of-record interface
//!
//! ID assignments live in a relational store owned by the control plane; this
//! crate only reads them. Every sub-cache refresh maps to one bulk read here.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricNameRecord {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelNameRecord {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelValueRecord {
    pub id: u32,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: u32,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub metric_name: String,
    pub app_label_name: String,
    /// Column index in `[1, MAX_APP_LABEL_COLUMN_INDEX]`; 0 is the target slot
    pub column_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: u32,
    /// The target's identifying label pairs
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricLabelRecord {
    pub metric_name: String,
    pub label_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTargetRecord {
    pub metric_id: u32,
    pub target_id: u32,
}

/// Bulk reads against the relational system of record
#[async_trait]
pub trait IdRegistry: Send + Sync {
    async fn metric_names(&self) -> Result<Vec<MetricNameRecord>>;
    async fn label_names(&self) -> Result<Vec<LabelNameRecord>>;
    async fn label_values(&self) -> Result<Vec<LabelValueRecord>>;
    async fn labels(&self) -> Result<Vec<LabelRecord>>;
    async fn layouts(&self) -> Result<Vec<LayoutRecord>>;
    async fn targets(&self) -> Result<Vec<TargetRecord>>;
    async fn metric_labels(&self) -> Result<Vec<MetricLabelRecord>>;
    async fn metric_targets(&self) -> Result<Vec<MetricTargetRecord>>;
}
