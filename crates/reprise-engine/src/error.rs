use reprise_core::errors::BackendError;
use reprise_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation already in flight for {0}")]
    GenerationInFlight(String),

    #[error("invalid redaction index {index}: {reason}")]
    InvalidRedaction { index: u64, reason: String },
}
