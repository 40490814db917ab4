use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync {0} not found")]
    NotFound(i64),

    /// Building or sending the HTTP request failed.
    #[error("Request error: {0}")]
    Request(String),

    #[error("Remote returned non-success status code: {0}")]
    Status(u16),

    /// The body was not a coordinate payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The ingest collaborator refused the payload.
    #[error("Payload rejected: {0}")]
    Rejected(String),

    /// Looking up the sync descriptor failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "NOT_FOUND",
            SyncError::Request(_) => "REQUEST_ERROR",
            SyncError::Status(_) => "STATUS_ERROR",
            SyncError::Decode(_) => "DECODE_ERROR",
            SyncError::Rejected(_) => "REJECTED",
            SyncError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
