use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::tokens::TokenUsage;

/// Chunks emitted by a streaming generation. Strict ordering contract:
///
/// Delta* → (Completed | Error)
///
/// `Completed` and `Error` are terminal. A stream that ends without either
/// is an early close, which consumers treat the same as an error. Anything
/// emitted after a terminal chunk is ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionChunk {
    Delta { text: String },
    Completed { usage: TokenUsage },
    Error { error: BackendErrorInfo },
}

impl CompletionChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Delta { .. })
    }
}

/// Lightweight error payload carried inside a chunk stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&BackendError> for BackendErrorInfo {
    fn from(e: &BackendError) -> Self {
        Self {
            kind: e.error_kind().to_string(),
            message: e.to_string(),
        }
    }
}
