use thiserror::Error;

pub use geoetl_core::error::BoxError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline document is malformed or missing required parts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A field was rejected by the SQL safety checks.
    #[error("Validation error in {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Decrypting credentials, dialing or pinging the source failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The compiled statement failed against the live source.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The batch handler returned an error.
    #[error("Consumer error: {0}")]
    Consumer(#[source] BoxError),

    /// The caller cancelled an interactive extraction.
    #[error("Extraction cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "CONFIG_ERROR",
            PipelineError::Validation { .. } => "VALIDATION_ERROR",
            PipelineError::Connection(_) => "CONNECTION_ERROR",
            PipelineError::Execution(_) => "EXECUTION_ERROR",
            PipelineError::Consumer(_) => "CONSUMER_ERROR",
            PipelineError::Cancelled => "CANCELLED",
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
