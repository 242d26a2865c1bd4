//! Error types for promlith

/// Result type alias for promlith operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for promlith
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query admission refused by the leaky bucket
    #[error("Prometheus query rate exceeded!")]
    RateExceeded,
    /// Request could not be parsed (matcher names, metric routing, times)
    #[error("{0}")]
    Parse(String),
    /// Request parsed but cannot be expressed as SQL
    #[error("{0}")]
    Translation(String),
    /// SQL execution or result decoding failed
    #[error("{0}")]
    Execution(String),
    /// Columnar store I/O error
    #[error("store error: {0}")]
    Store(String),
    /// Schema evolution failed
    #[error("schema error: {0}")]
    Schema(String),
    /// Cache refresh sub-failure
    #[error("cache refresh error: {0}")]
    Cache(String),
    /// Ingest-side failure (counted, not propagated to remote-write callers)
    #[error("ingest error: {0}")]
    Ingest(String),
    /// JSON body carries a field outside the declared schema
    #[error("rogue field({0})")]
    RogueField(String),
}

impl Error {
    /// Error class reported in the HTTP error envelope as `errorType`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::RateExceeded => "admission",
            Error::Parse(_) | Error::RogueField(_) => "parse",
            Error::Translation(_) => "translation",
            Error::Execution(_) | Error::Store(_) => "execution",
            Error::Schema(_) => "schema",
            Error::Cache(_) => "cache",
            Error::Ingest(_) => "ingest",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(e: snap::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
