/// Failure of a single analysis attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("api error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("no usable content in response")]
    EmptyResponse,
    #[error("malformed output after repair: {0}")]
    Malformed(String),
    #[error("invalid output: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("analysis timed out")]
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RerunError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(StoreError),
    #[error("re-analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

impl From<StoreError> for RerunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => RerunError::NotFound(format!("{} {}", kind, id)),
            other => RerunError::Store(other),
        }
    }
}
