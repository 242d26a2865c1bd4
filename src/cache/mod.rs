//! In-memory ID cache
//!
//! Bridges high-cardinality Prometheus label strings to the compact integer
//! IDs used as columnar keys. Seven sub-caches are refreshed from the system
//! of record on a fixed period under a single-flight discipline: at most one
//! refresh body runs per cache instance, and a tick that finds a refresh in
//! flight waits for it rather than stacking a second one.
//!
//! Refresh ordering: `MetricName` and `Label` first (the others reference
//! the IDs they define), then the remaining six concurrently.

mod maps;
mod registry;

pub use maps::{
    LabelCache, LabelKey, LabelNameCache, LabelValueCache, LayoutCache, LayoutKey,
    MetricLabelCache, MetricLabelKey, MetricNameCache, MetricTargetCache, MetricTargetKey,
    TargetCache, TargetKey,
};
pub use registry::{
    IdRegistry, LabelNameRecord, LabelRecord, LabelValueRecord, LayoutRecord, MetricLabelRecord,
    MetricNameRecord, MetricTargetRecord, TargetRecord,
};

use crate::{Error, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which sub-caches a debug snapshot should include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    All,
    MetricName,
    LabelName,
    LabelValue,
    Layout,
    Target,
    Label,
    MetricLabel,
    MetricTarget,
}

impl FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(CacheKind::All),
            "metric_name" => Ok(CacheKind::MetricName),
            "label_name" => Ok(CacheKind::LabelName),
            "label_value" => Ok(CacheKind::LabelValue),
            "metric_and_app_label_layout" | "layout" => Ok(CacheKind::Layout),
            "target" => Ok(CacheKind::Target),
            "label" => Ok(CacheKind::Label),
            "metric_label" => Ok(CacheKind::MetricLabel),
            "metric_target" => Ok(CacheKind::MetricTarget),
            other => Err(Error::Parse(format!("unknown cache kind {other}"))),
        }
    }
}

/// The ID cache: seven sub-caches plus the refresh machinery
pub struct IdCache {
    registry: Arc<dyn IdRegistry>,
    refresh_interval: Duration,
    /// Single-flight token: one permit means one refresh at a time
    refresh_token: Semaphore,

    pub metric_name: Arc<MetricNameCache>,
    pub label_name: LabelNameCache,
    pub label_value: LabelValueCache,
    pub layout: LayoutCache,
    pub target: TargetCache,
    pub label: Arc<LabelCache>,
    pub metric_label: MetricLabelCache,
    pub metric_target: MetricTargetCache,
}

impl IdCache {
    pub fn new(registry: Arc<dyn IdRegistry>, refresh_interval: Duration) -> Arc<Self> {
        let metric_name = Arc::new(MetricNameCache::default());
        let label = Arc::new(LabelCache::default());
        Arc::new(Self {
            registry,
            refresh_interval,
            refresh_token: Semaphore::new(1),
            metric_name: metric_name.clone(),
            label_name: LabelNameCache::default(),
            label_value: LabelValueCache::default(),
            layout: LayoutCache::default(),
            target: TargetCache::default(),
            label: label.clone(),
            metric_label: MetricLabelCache::new(label),
            metric_target: MetricTargetCache::new(metric_name),
        })
    }

    /// Run an initial refresh, then keep refreshing on the configured period
    /// until `cancel` fires. The initial refresh error is returned; periodic
    /// errors are logged and retried next tick.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.try_refresh().await?;

        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.reset();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = cache.try_refresh().await {
                            warn!("periodic cache refresh failed: {e}");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
        Ok(())
    }

    /// Acquire the single-flight token and refresh. If a refresh is already
    /// running, wait in 1 s steps until the token frees up, then run.
    pub async fn try_refresh(&self) -> Result<()> {
        loop {
            match self.refresh_token.try_acquire() {
                Ok(_permit) => return self.refresh().await,
                Err(_) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    info!("last refresh cache not completed now");
                }
            }
        }
    }

    /// Refresh every sub-cache. A failing sub-refresh keeps that sub-cache's
    /// prior contents and does not stop the others; the first error is
    /// returned once all have completed.
    async fn refresh(&self) -> Result<()> {
        info!("refresh cache started");

        let (metric_names, labels) =
            tokio::join!(self.registry.metric_names(), self.registry.labels());
        let mut first_err = None;
        match metric_names {
            Ok(records) => self.metric_name.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "metric_name", e),
        }
        match labels {
            Ok(records) => self.label.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "label", e),
        }

        let (label_names, label_values, layouts, metric_labels, targets, metric_targets) = tokio::join!(
            self.registry.label_names(),
            self.registry.label_values(),
            self.registry.layouts(),
            self.registry.metric_labels(),
            self.registry.targets(),
            self.registry.metric_targets(),
        );
        match label_names {
            Ok(records) => self.label_name.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "label_name", e),
        }
        match label_values {
            Ok(records) => self.label_value.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "label_value", e),
        }
        match layouts {
            Ok(records) => self.layout.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "layout", e),
        }
        match metric_labels {
            Ok(records) => self.metric_label.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "metric_label", e),
        }
        match targets {
            Ok(records) => self.target.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "target", e),
        }
        match metric_targets {
            Ok(records) => self.metric_target.apply(records),
            Err(e) => Self::note_failure(&mut first_err, "metric_target", e),
        }

        info!("refresh cache completed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn note_failure(first_err: &mut Option<Error>, sub_cache: &str, e: Error) {
        warn!("refresh of {sub_cache} failed, keeping prior contents: {e}");
        if first_err.is_none() {
            *first_err = Some(Error::Cache(format!("{sub_cache}: {e}")));
        }
    }

    /// Serialize the requested sub-caches. Composite keys are rendered as
    /// JSON strings; iteration tolerates concurrent mutation.
    pub fn debug_snapshot(&self, kinds: &[CacheKind]) -> serde_json::Value {
        let all = kinds.contains(&CacheKind::All);
        let wants = |k: CacheKind| all || kinds.contains(&k);
        let mut content = serde_json::Map::new();

        if wants(CacheKind::MetricName) {
            content.insert("metric_name".into(), self.metric_name.snapshot());
        }
        if wants(CacheKind::LabelName) {
            content.insert("label_name".into(), self.label_name.snapshot());
        }
        if wants(CacheKind::LabelValue) {
            content.insert("label_value".into(), self.label_value.snapshot());
        }
        if wants(CacheKind::Layout) {
            content.insert("metric_and_app_label_layout".into(), self.layout.snapshot());
        }
        if wants(CacheKind::Target) {
            content.insert("target".into(), self.target.snapshot());
        }
        if wants(CacheKind::Label) {
            content.insert("label".into(), self.label.snapshot());
        }
        if wants(CacheKind::MetricLabel) {
            content.insert("metric_label".into(), self.metric_label.snapshot());
        }
        if wants(CacheKind::MetricTarget) {
            content.insert("metric_target".into(), self.metric_target.snapshot());
        }

        serde_json::Value::Object(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_kind_parsing() {
        assert_eq!("all".parse::<CacheKind>().unwrap(), CacheKind::All);
        assert_eq!(
            "metric_and_app_label_layout".parse::<CacheKind>().unwrap(),
            CacheKind::Layout
        );
        assert!("bogus".parse::<CacheKind>().is_err());
    }
}
