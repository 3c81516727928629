//! Append-only JSONL persistence: one directory per identity, holding the
//! interaction log and the redaction log.

pub mod error;
pub mod interactions;
mod jsonl;
pub mod redactions;

pub use error::StoreError;
pub use interactions::{InteractionRecord, InteractionStore, RecordStatus};
pub use redactions::{RedactionLog, RedactionRecord};
