//! Transcript assembly and generation orchestration: sessions are loaded
//! from append-only logs, windowed against a token budget, and extended one
//! streamed generation attempt at a time.

pub mod error;
pub mod generation;
pub mod session;
pub mod window;

pub use error::EngineError;
pub use generation::{GenerationController, GenerationOutcome};
pub use session::{IdentityLocks, Session, StrikeOutcome};
pub use window::build_window;
