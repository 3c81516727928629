use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use reprise_core::{Identity, ERROR_SENTINEL};

use crate::error::StoreError;
use crate::jsonl;

pub const INTERACTIONS_FILE: &str = "interactions.jsonl";

/// Outcome tag on a persisted interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Failed,
}

/// One persisted user/assistant exchange.
///
/// Field names and the one-object-per-line framing are the on-disk
/// compatibility contract; logs written by earlier builds keep loading
/// unchanged. Records that predate status tagging carry no `status` field
/// and are classified by comparing `output` against the fallback sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp: DateTime<Utc>,
    pub input: String,
    pub output: String,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
}

impl InteractionRecord {
    pub fn ok(input: impl Into<String>, output: impl Into<String>, tokens: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            input: input.into(),
            output: output.into(),
            tokens,
            status: Some(RecordStatus::Ok),
        }
    }

    pub fn failed(input: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            input: input.into(),
            output: ERROR_SENTINEL.to_string(),
            tokens: 0,
            status: Some(RecordStatus::Failed),
        }
    }

    /// Whether this record is excluded from loaded transcripts.
    pub fn is_failed(&self) -> bool {
        match self.status {
            Some(RecordStatus::Failed) => true,
            Some(RecordStatus::Ok) => false,
            None => self.output == ERROR_SENTINEL,
        }
    }
}

/// Append-only store of completed exchanges, one JSONL file per identity
/// under `<data_dir>/<identity>/interactions.jsonl`.
///
/// Takes no locks; callers serialize same-identity writes.
#[derive(Clone, Debug)]
pub struct InteractionStore {
    data_dir: PathBuf,
}

impl InteractionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, identity: &Identity) -> PathBuf {
        self.data_dir.join(identity.as_str()).join(INTERACTIONS_FILE)
    }

    #[instrument(skip(self, record), fields(identity = %identity))]
    pub fn append(&self, identity: &Identity, record: &InteractionRecord) -> Result<(), StoreError> {
        jsonl::append_record(&self.path(identity), record)
    }

    /// Records that contribute to the transcript, in file order. Failed
    /// attempts stay on disk for audit but are filtered out here.
    pub fn load_all(&self, identity: &Identity) -> Result<Vec<InteractionRecord>, StoreError> {
        Ok(self
            .load_raw(identity)?
            .into_iter()
            .filter(|r| !r.is_failed())
            .collect())
    }

    /// Every well-formed record in file order, including failed attempts.
    pub fn load_raw(&self, identity: &Identity) -> Result<Vec<InteractionRecord>, StoreError> {
        jsonl::read_records(&self.path(identity))
    }
}
