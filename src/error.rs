use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by the probe pipeline
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// An expected input file or directory is missing
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Structured input (template, responses, score file) failed to parse
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A per-model result (file or quiz page text) failed to parse
    #[error("malformed result from {what}: {detail}")]
    MalformedResult { what: String, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The classifier returned a label outside the candidate set
    #[error("unexpected classifier output: label {0:?}")]
    UnexpectedClassifierOutput(String),

    /// A branch that should be unreachable was taken
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A generation, classification, or browser call failed
    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    /// Whether retrying the operation could plausibly succeed.
    ///
    /// Only the external-service boundary is failure-prone; configuration
    /// and parse errors abort immediately instead of burning quota.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeError::ExternalService(_) | ProbeError::Timeout { .. }
        )
    }
}

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;
