use std::time::Duration;
use thiserror::Error;

/// Failures while turning an uploaded image into a base64 payload.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unsupported image type: {0} (accepted: image/jpeg, image/png, image/webp)")]
    InvalidType(String),

    #[error("image is too large: {size} bytes (limit {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("image is empty")]
    Empty,

    #[error("failed to read image: {0}")]
    ReadError(#[from] std::io::Error),
}

/// Failures of a single request/response cycle against one provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("content blocked: {0}")]
    ContentBlocked(String),

    #[error("no candidates returned")]
    NoCandidates,

    #[error("no usable model available: {0}")]
    NoModelAvailable(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures while extracting the result object from a model reply.
#[derive(Debug, Error, PartialEq)]
pub enum ParsingError {
    #[error("no JSON object found in model reply")]
    NoJsonFound,

    #[error("model reply is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("invalid `{field}`: {reason}")]
    SchemaViolation { field: String, reason: String },
}

impl ParsingError {
    pub(crate) fn schema(field: &str, reason: impl Into<String>) -> Self {
        ParsingError::SchemaViolation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything that can go wrong while trying one provider.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Parsing(#[from] ParsingError),
}

/// One provider's failure, as recorded by the fallback chain.
#[derive(Debug, Error)]
#[error("{provider}: {error}")]
pub struct ProviderFailure {
    pub provider: String,
    pub error: AttemptError,
}

/// Final outcome of a failed analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("no vision provider is configured")]
    NoProviders,

    #[error("all providers failed: {}", join_failures(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),
}

impl AnalysisError {
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            AnalysisError::AllProvidersFailed(failures) => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
