use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use reprise_core::Identity;

use crate::error::StoreError;
use crate::jsonl;

pub const REDACTIONS_FILE: &str = "redactions.jsonl";

/// One recorded strike.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedactionRecord {
    pub timestamp: DateTime<Utc>,
    /// Position of the struck assistant turn in the filtered, pre-redaction
    /// expansion of the interaction log.
    pub message_idx: u64,
}

/// Append-only log of strikes, one JSONL file per identity under
/// `<data_dir>/<identity>/redactions.jsonl`.
///
/// Purely additive, and nothing here validates indices; the session
/// assembler interprets them against the expansion at load time.
#[derive(Clone, Debug)]
pub struct RedactionLog {
    data_dir: PathBuf,
}

impl RedactionLog {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, identity: &Identity) -> PathBuf {
        self.data_dir.join(identity.as_str()).join(REDACTIONS_FILE)
    }

    #[instrument(skip(self), fields(identity = %identity))]
    pub fn append(&self, identity: &Identity, message_idx: u64) -> Result<(), StoreError> {
        let record = RedactionRecord {
            timestamp: Utc::now(),
            message_idx,
        };
        jsonl::append_record(&self.path(identity), &record)
    }

    /// Indices exactly as recorded: file order, duplicates preserved.
    pub fn load_indices(&self, identity: &Identity) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .load_all(identity)?
            .into_iter()
            .map(|r| r.message_idx)
            .collect())
    }

    pub fn load_all(&self, identity: &Identity) -> Result<Vec<RedactionRecord>, StoreError> {
        jsonl::read_records(&self.path(identity))
    }
}
