use serde::{Deserialize, Serialize};

use crate::ids::TurnId;

/// Fixed assistant reply recorded in place of output when a generation
/// attempt fails. Loads compare against this exact string when a record
/// predates explicit status tagging.
pub const ERROR_SENTINEL: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// One entry in a transcript.
///
/// Turns are immutable once created. A transcript only ever changes by
/// appending a turn or by removing a whole user/assistant pair during
/// redaction. Only assistant turns carry a token cost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { id: TurnId, content: String },
    Assistant { id: TurnId, content: String, tokens: u64 },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            id: TurnId::new(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>, tokens: u64) -> Self {
        Self::Assistant {
            id: TurnId::new(),
            content: content.into(),
            tokens,
        }
    }

    /// The assistant turn shown when a generation attempt fails.
    pub fn fallback() -> Self {
        Self::assistant(ERROR_SENTINEL, 0)
    }

    pub fn id(&self) -> &TurnId {
        match self {
            Self::User { id, .. } | Self::Assistant { id, .. } => id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::User { content, .. } | Self::Assistant { content, .. } => content,
        }
    }

    /// Token cost of this turn. User turns cost nothing.
    pub fn tokens(&self) -> u64 {
        match self {
            Self::User { .. } => 0,
            Self::Assistant { tokens, .. } => *tokens,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Assistant { content, .. } if content == ERROR_SENTINEL)
    }
}
