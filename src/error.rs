//! Error types for GMH operations

use thiserror::Error;

/// Main error type for GMH operations
#[derive(Error, Debug)]
pub enum GmhError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An invariant of the domain model was violated by the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A manifest failed structural validation, either on build or on parse.
    #[error("Manifest schema violation: {0}")]
    Schema(String),

    /// The container does not hold what its manifest declares.
    #[error("Corrupt container: {0}")]
    Corruption(String),

    #[error("External tool `{command}` failed with {status}: {stderr}")]
    ExternalTool {
        command: String,
        status: String,
        stderr: String,
    },

    /// A check made before any side effect failed.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unsupported sample precision: {0} bytes")]
    UnsupportedPrecision(u32),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for GMH operations
pub type Result<T> = std::result::Result<T, GmhError>;

impl From<serde_json::Error> for GmhError {
    fn from(err: serde_json::Error) -> Self {
        GmhError::Serialization(err.to_string())
    }
}

impl GmhError {
    pub(crate) fn missing_member(name: &str) -> Self {
        GmhError::Corruption(format!("archive member `{}` is missing", name))
    }
}
