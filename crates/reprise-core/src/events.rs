use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::ids::GenerationId;
use crate::turn::Turn;

/// Events broadcast as a transcript changes, for live UI updates.
///
/// One generation attempt emits `TurnStart`, zero or more `Delta`s, then
/// exactly one of `TurnComplete` or `TurnFailed`. `Redacted` is emitted when
/// a strike removes a pair. Subscribers key off `identity()` to filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TurnStart {
        identity: Identity,
        generation_id: GenerationId,
        user_turn: Turn,
    },
    Delta {
        identity: Identity,
        generation_id: GenerationId,
        text: String,
    },
    TurnComplete {
        identity: Identity,
        generation_id: GenerationId,
        turn: Turn,
    },
    TurnFailed {
        identity: Identity,
        generation_id: GenerationId,
        turn: Turn,
        reason: String,
    },
    Redacted {
        identity: Identity,
        message_idx: u64,
    },
}

impl SessionEvent {
    /// Identity whose transcript this event belongs to.
    pub fn identity(&self) -> &Identity {
        match self {
            Self::TurnStart { identity, .. }
            | Self::Delta { identity, .. }
            | Self::TurnComplete { identity, .. }
            | Self::TurnFailed { identity, .. }
            | Self::Redacted { identity, .. } => identity,
        }
    }

    /// Stable event name for the wire and for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::Delta { .. } => "delta",
            Self::TurnComplete { .. } => "turn_complete",
            Self::TurnFailed { .. } => "turn_failed",
            Self::Redacted { .. } => "redacted",
        }
    }
}
