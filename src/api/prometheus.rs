//! Prometheus HTTP API handlers
//!
//! Query endpoints answer with `{status, data{resultType, result}, stats?}`
//! on success and `{status: "error", errorType, error}` on failure. Remote
//! write acks with 204 even when series are dropped internally; drops are
//! visible through the writer counters.

use crate::api::ApiState;
use crate::cache::CacheKind;
use crate::config::ConfigPatch;
use crate::ingest::resolve_series;
use crate::query::promql::{PromQueryParams, PromSeriesParams};
use crate::wire;
use crate::Error;

use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::debug;

/// Error envelope for all query APIs
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: String,
    #[serde(rename = "errorType")]
    pub error_type: String,
    pub error: String,
}

fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::RateExceeded => StatusCode::TOO_MANY_REQUESTS,
        Error::Parse(_) | Error::Translation(_) | Error::RogueField(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorEnvelope {
            status: "error".to_string(),
            error_type: e.error_type().to_string(),
            error: e.to_string(),
        }),
    )
        .into_response()
}

fn now_seconds() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Instant query parameters
#[derive(Debug, Deserialize)]
pub struct InstantQueryParams {
    pub query: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
}

/// Instant query endpoint
///
/// GET/POST /api/v1/query
pub async fn instant_query(
    State(state): State<ApiState>,
    Query(params): Query<InstantQueryParams>,
) -> Response {
    let args = PromQueryParams {
        promql: params.query,
        start_time: params.time.unwrap_or_else(now_seconds),
        debug: params.debug.unwrap_or_default(),
        ..Default::default()
    };
    match state.executor.instant_query(&args).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Range query parameters
#[derive(Debug, Deserialize)]
pub struct RangeQueryParams {
    pub query: String,
    pub start: String,
    pub end: String,
    pub step: String,
    #[serde(default)]
    pub debug: Option<bool>,
}

/// Range query endpoint
///
/// GET/POST /api/v1/query_range
pub async fn range_query(
    State(state): State<ApiState>,
    Query(params): Query<RangeQueryParams>,
) -> Response {
    let args = PromQueryParams {
        promql: params.query,
        start_time: params.start,
        end_time: params.end,
        step: params.step,
        debug: params.debug.unwrap_or_default(),
    };
    match state.executor.range_query(&args).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Series response
#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub status: String,
    pub data: Vec<BTreeMap<String, String>>,
}

/// Series endpoint; `match[]` repeats, so the query string is parsed by hand
///
/// GET/POST /api/v1/series
pub async fn series(
    State(state): State<ApiState>,
    RawQuery(raw): RawQuery,
    body: String,
) -> Response {
    let mut pairs = parse_query_pairs(raw.as_deref().unwrap_or_default());
    pairs.extend(parse_query_pairs(&body));

    let params = PromSeriesParams {
        matchers: pairs
            .iter()
            .filter(|(k, _)| k == "match[]")
            .map(|(_, v)| v.clone())
            .collect(),
        start_time: single_param(&pairs, "start").unwrap_or_else(now_seconds),
        end_time: single_param(&pairs, "end").unwrap_or_else(now_seconds),
    };
    match state.executor.series(&params).await {
        Ok(data) => Json(SeriesResponse {
            status: "success".to_string(),
            data,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Label values response
#[derive(Debug, Serialize)]
pub struct LabelValuesResponse {
    pub status: String,
    pub data: Vec<String>,
}

/// Get values for a specific label
///
/// GET /api/v1/label/{name}/values
pub async fn label_values(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.executor.label_values(&name).await {
        Ok(data) => Json(LabelValuesResponse {
            status: "success".to_string(),
            data,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Remote read endpoint: snappy-compressed protobuf in and out
///
/// POST /api/v1/read
pub async fn remote_read(State(state): State<ApiState>, body: Bytes) -> Response {
    let req = match wire::decode_read_request(&body) {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };
    match state.executor.remote_read(&req).await {
        Ok(resp) => match wire::encode_read_response(&resp) {
            Ok(encoded) => (
                [
                    (header::CONTENT_TYPE, "application/x-protobuf"),
                    (header::CONTENT_ENCODING, "snappy"),
                ],
                encoded,
            )
                .into_response(),
            Err(e) => error_response(&e),
        },
        Err(e) => error_response(&e),
    }
}

/// Remote write endpoint
///
/// POST /api/v1/write
/// Content-Encoding: snappy
/// Content-Type: application/x-protobuf
pub async fn remote_write(State(state): State<ApiState>, body: Bytes) -> Response {
    let req = match wire::decode_write_request(&body) {
        Ok(req) => req,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    // Group resolved series into homogeneous (metric, width) batches; the
    // first series of a group carries the flow tags for the whole batch.
    struct Group {
        samples: Vec<crate::ingest::Sample>,
        series: wire::TimeSeries,
        label_name_ids: Vec<u32>,
        label_value_ids: Vec<u32>,
    }
    let mut groups: HashMap<(String, usize), Group> = HashMap::new();
    let mut skipped = 0usize;

    for ts in &req.timeseries {
        let Some(resolved) = resolve_series(&state.cache, ts) else {
            // IDs not assigned yet; the upstream queue re-presents the data
            skipped += 1;
            continue;
        };
        let width = resolved
            .samples
            .first()
            .map(|s| s.app_label_value_ids.len())
            .unwrap_or(1);
        match groups.entry((resolved.metric_name.clone(), width)) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().samples.extend(resolved.samples);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Group {
                    samples: resolved.samples,
                    series: ts.clone(),
                    label_name_ids: resolved.label_name_ids,
                    label_value_ids: resolved.label_value_ids,
                });
            }
        }
    }
    if skipped > 0 {
        state.writer.counters().add_skipped_series(skipped as u64);
        debug!(skipped, "series without assigned IDs skipped");
    }

    for ((metric_name, _width), group) in groups {
        state
            .writer
            .write_batch(
                group.samples,
                &metric_name,
                &group.series,
                &group.label_name_ids,
                &group.label_value_ids,
            )
            .await;
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Debug cache snapshot parameters
#[derive(Debug, Deserialize)]
pub struct DebugCacheParams {
    /// Comma-separated cache kinds; defaults to `all`
    #[serde(default)]
    pub kind: Option<String>,
}

/// Serialize the requested sub-caches
///
/// GET /debug/cache
pub async fn debug_cache(
    State(state): State<ApiState>,
    Query(params): Query<DebugCacheParams>,
) -> Response {
    let spec = params.kind.unwrap_or_else(|| "all".to_string());
    let mut kinds = Vec::new();
    for part in spec.split(',').filter(|s| !s.is_empty()) {
        match part.parse::<CacheKind>() {
            Ok(kind) => kinds.push(kind),
            Err(e) => return error_response(&e),
        }
    }
    Json(state.cache.debug_snapshot(&kinds)).into_response()
}

/// Config update response
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub status: String,
}

/// Apply a runtime config patch; unknown fields are rejected
///
/// POST /api/v1/config
pub async fn update_config(
    State(state): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Err(e) = state.config_schema.check(&body) {
        return error_response(&e);
    }
    let patch: ConfigPatch = match serde_json::from_value(body) {
        Ok(patch) => patch,
        Err(e) => return error_response(&Error::Parse(e.to_string())),
    };
    state.config.write().apply(&patch);
    Json(ConfigResponse {
        status: "success".to_string(),
    })
    .into_response()
}

fn single_param(pairs: &[(String, String)], name: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    out.push(hi * 16 + lo);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_pairs_repeated_keys() {
        let pairs = parse_query_pairs("match[]=up&match[]=node_load1&start=1700000000");
        let matches: Vec<_> = pairs
            .iter()
            .filter(|(k, _)| k == "match[]")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(matches, vec!["up", "node_load1"]);
        assert_eq!(single_param(&pairs, "start").as_deref(), Some("1700000000"));
    }

    #[test]
    fn test_percent_decoding() {
        let pairs = parse_query_pairs("match%5B%5D=up%7Bjob%3D%22node%22%7D&q=a+b");
        assert_eq!(pairs[0].0, "match[]");
        assert_eq!(pairs[0].1, r#"up{job="node"}"#);
        assert_eq!(pairs[1].1, "a b");
    }
}
