use std::io;

/// Failures raised by the append-only JSONL stores. Reads tolerate
/// malformed lines by skipping them, so `Malformed` only surfaces when a
/// record fails to serialize on the way out.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io failure: {0}")]
    Io(#[from] io::Error),

    #[error("invalid record json: {0}")]
    Malformed(#[from] serde_json::Error),
}
