//! Prometheus remote read/write wire protocol
//!
//! Hand-derived prost messages matching the upstream `prompb` field numbers,
//! restricted to labels and samples. Bodies travel snappy-compressed.

use crate::Result;
use prost::Message;

/// The reserved label carrying the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since epoch
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    /// Value of the `__name__` label, if present.
    pub fn metric_name(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == METRIC_NAME_LABEL)
            .map(|l| l.value.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum MatcherType {
    Eq = 0,
    Neq = 1,
    Re = 2,
    Nre = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelMatcher {
    #[prost(enumeration = "MatcherType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

impl LabelMatcher {
    pub fn new(matcher_type: MatcherType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            r#type: matcher_type as i32,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matcher_type(&self) -> Option<MatcherType> {
        MatcherType::try_from(self.r#type).ok()
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadHints {
    #[prost(int64, tag = "1")]
    pub step_ms: i64,
    /// Aggregation hint, e.g. `sum`, or the synthetic `series`
    #[prost(string, tag = "2")]
    pub func: String,
    #[prost(int64, tag = "3")]
    pub start_ms: i64,
    #[prost(int64, tag = "4")]
    pub end_ms: i64,
    #[prost(string, repeated, tag = "5")]
    pub grouping: Vec<String>,
    #[prost(bool, tag = "6")]
    pub by: bool,
    #[prost(int64, tag = "7")]
    pub range_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Query {
    #[prost(int64, tag = "1")]
    pub start_timestamp_ms: i64,
    #[prost(int64, tag = "2")]
    pub end_timestamp_ms: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<LabelMatcher>,
    #[prost(message, optional, tag = "4")]
    pub hints: Option<ReadHints>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryResult {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(message, repeated, tag = "1")]
    pub queries: Vec<Query>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<QueryResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// Decode a snappy-compressed remote write body.
pub fn decode_write_request(body: &[u8]) -> Result<WriteRequest> {
    let raw = snap::raw::Decoder::new().decompress_vec(body)?;
    Ok(WriteRequest::decode(raw.as_slice())?)
}

/// Encode a remote write request, snappy-compressed. Mostly useful for
/// clients and tests; the server side decodes.
pub fn encode_write_request(req: &WriteRequest) -> Result<Vec<u8>> {
    let raw = req.encode_to_vec();
    Ok(snap::raw::Encoder::new().compress_vec(&raw)?)
}

/// Decode a snappy-compressed remote read body.
pub fn decode_read_request(body: &[u8]) -> Result<ReadRequest> {
    let raw = snap::raw::Decoder::new().decompress_vec(body)?;
    Ok(ReadRequest::decode(raw.as_slice())?)
}

/// Encode a remote read response, snappy-compressed.
pub fn encode_read_response(resp: &ReadResponse) -> Result<Vec<u8>> {
    let raw = resp.encode_to_vec();
    Ok(snap::raw::Encoder::new().compress_vec(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_snappy_round_trip() {
        let req = ReadRequest {
            queries: vec![Query {
                start_timestamp_ms: 1_700_000_000_000,
                end_timestamp_ms: 1_700_000_060_000,
                matchers: vec![LabelMatcher::new(MatcherType::Eq, METRIC_NAME_LABEL, "up")],
                hints: Some(ReadHints {
                    start_ms: 1_700_000_000_000,
                    end_ms: 1_700_000_060_000,
                    ..Default::default()
                }),
            }],
        };

        let compressed = snap::raw::Encoder::new()
            .compress_vec(&req.encode_to_vec())
            .unwrap();
        let decoded = decode_read_request(&compressed).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(
            decoded.queries[0].matchers[0].matcher_type(),
            Some(MatcherType::Eq)
        );
    }

    #[test]
    fn test_metric_name_lookup() {
        let ts = TimeSeries {
            labels: vec![
                Label {
                    name: "job".into(),
                    value: "node".into(),
                },
                Label {
                    name: METRIC_NAME_LABEL.into(),
                    value: "up".into(),
                },
            ],
            samples: vec![],
        };
        assert_eq!(ts.metric_name(), Some("up"));
    }
}
