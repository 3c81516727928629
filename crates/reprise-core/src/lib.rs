//! Shared vocabulary for the reprise workspace: identities, turns, streaming
//! chunks, the backend trait, and configuration.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod tokens;
pub mod turn;

pub use backend::{ChatBackend, ChatMessage, GenerationOptions, Role};
pub use chunk::{BackendErrorInfo, CompletionChunk};
pub use config::AppConfig;
pub use errors::BackendError;
pub use events::SessionEvent;
pub use identity::{Identity, InvalidIdentity};
pub use ids::{GenerationId, TurnId};
pub use tokens::TokenUsage;
pub use turn::{Turn, ERROR_SENTINEL};
