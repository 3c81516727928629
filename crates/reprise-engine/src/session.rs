use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use reprise_core::turn::Turn;
use reprise_core::Identity;
use reprise_store::{InteractionStore, RedactionLog};

use crate::error::EngineError;

/// Result of striking a pair out of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrikeOutcome {
    /// Origin index of the struck assistant turn, as recorded in the
    /// redaction log.
    pub message_idx: u64,
    pub remaining_turns: usize,
}

/// An identity's transcript, assembled from the interaction log with
/// redactions applied.
///
/// Alongside each visible turn the session keeps that turn's origin index
/// in the pre-redaction expansion of the interaction log. Origin indices
/// are what redaction records store: the log is append-only and the
/// failed-attempt filter is deterministic, so an origin index names the
/// same pair forever no matter how many strikes come later. Turns appended
/// live (not yet persisted) have no origin.
pub struct Session {
    turns: Vec<Turn>,
    origins: Vec<Option<u64>>,
}

impl Session {
    /// Assemble the session for `identity` from its two logs.
    ///
    /// Each persisted exchange expands to a user turn at origin `2k` and an
    /// assistant turn at origin `2k+1`. Redaction records are applied
    /// mark-then-sweep so that one strike cannot shift the indices another
    /// refers to. A record that does not name a strikeable assistant turn
    /// is logged and skipped; one bad strike should not take the whole
    /// transcript down with it.
    pub fn load(
        identity: &Identity,
        interactions: &InteractionStore,
        redactions: &RedactionLog,
    ) -> Result<Self, EngineError> {
        let records = interactions.load_all(identity)?;

        let mut expanded = Vec::with_capacity(records.len() * 2);
        for record in &records {
            expanded.push(Turn::user(record.input.clone()));
            expanded.push(Turn::assistant(record.output.clone(), record.tokens));
        }

        let mut struck = vec![false; expanded.len()];
        for idx in redactions.load_indices(identity)? {
            let valid = (idx as usize) < expanded.len()
                && idx % 2 == 1
                && !struck[idx as usize];
            if !valid {
                warn!(
                    identity = %identity,
                    message_idx = idx,
                    "skipping inconsistent redaction record"
                );
                continue;
            }
            struck[idx as usize] = true;
            struck[idx as usize - 1] = true;
        }

        let mut turns = Vec::with_capacity(expanded.len());
        let mut origins = Vec::with_capacity(expanded.len());
        for (i, turn) in expanded.into_iter().enumerate() {
            if !struck[i] {
                turns.push(turn);
                origins.push(Some(i as u64));
            }
        }

        Ok(Self { turns, origins })
    }

    /// Visible turns in order: user/assistant pairs, possibly followed by
    /// one unanswered user turn.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    /// Append a live turn that has not been persisted yet.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.origins.push(None);
    }

    /// Strike the assistant turn at visible position `index`, removing it
    /// together with its paired user turn.
    ///
    /// Returns the origin index to record in the redaction log. Striking
    /// anything but a persisted assistant turn is refused; in particular a
    /// live fallback pair has no origin and cannot be struck.
    pub fn strike(&mut self, index: u64) -> Result<StrikeOutcome, EngineError> {
        let i = index as usize;
        if i >= self.turns.len() {
            return Err(EngineError::InvalidRedaction {
                index,
                reason: "index out of range".to_string(),
            });
        }
        if !self.turns[i].is_assistant() {
            return Err(EngineError::InvalidRedaction {
                index,
                reason: "does not address an assistant turn".to_string(),
            });
        }
        let message_idx = match self.origins[i] {
            Some(origin) => origin,
            None => {
                return Err(EngineError::InvalidRedaction {
                    index,
                    reason: "turn is not part of the persisted transcript".to_string(),
                });
            }
        };

        // Assistant turns always directly follow their user turn, so the
        // pair sits at i-1, i.
        self.turns.remove(i);
        self.turns.remove(i - 1);
        self.origins.remove(i);
        self.origins.remove(i - 1);

        Ok(StrikeOutcome {
            message_idx,
            remaining_turns: self.turns.len(),
        })
    }
}

/// Per-identity locks serializing load/mutate/persist critical sections.
///
/// Locks are created on first use and kept for the life of the process.
/// Operations on different identities never contend.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &Identity) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(identity.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_store::InteractionRecord;
    use tempfile::TempDir;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    fn stores(dir: &TempDir) -> (InteractionStore, RedactionLog) {
        (
            InteractionStore::new(dir.path()),
            RedactionLog::new(dir.path()),
        )
    }

    fn seed(store: &InteractionStore, identity: &Identity, exchanges: &[(&str, &str, u64)]) {
        for (input, output, tokens) in exchanges {
            store
                .append(identity, &InteractionRecord::ok(*input, *output, *tokens))
                .unwrap();
        }
    }

    #[test]
    fn empty_store_loads_empty_session() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let session = Session::load(&alice(), &interactions, &redactions).unwrap();
        assert!(session.turns().is_empty());
    }

    #[test]
    fn records_expand_to_alternating_pairs() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(
            &interactions,
            &identity,
            &[("q1", "a1", 10), ("q2", "a2", 20), ("q3", "a3", 30)],
        );

        let session = Session::load(&identity, &interactions, &redactions).unwrap();
        let turns = session.turns();
        assert_eq!(turns.len(), 6);
        for (i, turn) in turns.iter().enumerate() {
            if i % 2 == 0 {
                assert!(!turn.is_assistant(), "even positions are user turns");
            } else {
                assert!(turn.is_assistant(), "odd positions are assistant turns");
            }
        }
        assert_eq!(turns[2].content(), "q2");
        assert_eq!(turns[3].content(), "a2");
        assert_eq!(turns[3].tokens(), 20);
    }

    #[test]
    fn redaction_removes_pair_on_load() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(
            &interactions,
            &identity,
            &[("q1", "a1", 1), ("q2", "a2", 2), ("q3", "a3", 3)],
        );
        redactions.append(&identity, 3).unwrap();

        let session = Session::load(&identity, &interactions, &redactions).unwrap();
        let contents: Vec<_> = session.turns().iter().map(|t| t.content()).collect();
        assert_eq!(contents, ["q1", "a1", "q3", "a3"]);
    }

    #[test]
    fn strike_maps_visible_index_to_origin() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(
            &interactions,
            &identity,
            &[("q1", "a1", 1), ("q2", "a2", 2), ("q3", "a3", 3)],
        );

        let mut session = Session::load(&identity, &interactions, &redactions).unwrap();
        let outcome = session.strike(3).unwrap();
        assert_eq!(outcome.message_idx, 3);
        assert_eq!(outcome.remaining_turns, 4);
        redactions.append(&identity, outcome.message_idx).unwrap();

        // After the reload the third pair has moved up to positions 2-3,
        // but its origin index is unchanged.
        let mut session = Session::load(&identity, &interactions, &redactions).unwrap();
        assert_eq!(session.turns()[3].content(), "a3");
        let outcome = session.strike(3).unwrap();
        assert_eq!(outcome.message_idx, 5);
        redactions.append(&identity, outcome.message_idx).unwrap();

        let session = Session::load(&identity, &interactions, &redactions).unwrap();
        let contents: Vec<_> = session.turns().iter().map(|t| t.content()).collect();
        assert_eq!(contents, ["q1", "a1"]);
    }

    #[test]
    fn inconsistent_redaction_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(&interactions, &identity, &[("q1", "a1", 1), ("q2", "a2", 2)]);

        redactions.append(&identity, 99).unwrap(); // out of range
        redactions.append(&identity, 2).unwrap(); // user turn
        redactions.append(&identity, 1).unwrap(); // valid
        redactions.append(&identity, 1).unwrap(); // duplicate of a struck turn

        let session = Session::load(&identity, &interactions, &redactions).unwrap();
        let contents: Vec<_> = session.turns().iter().map(|t| t.content()).collect();
        assert_eq!(contents, ["q2", "a2"]);
    }

    #[test]
    fn strike_rejects_out_of_range_index() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(&interactions, &identity, &[("q1", "a1", 1)]);

        let mut session = Session::load(&identity, &interactions, &redactions).unwrap();
        let err = session.strike(7).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRedaction { index: 7, .. }));
        assert_eq!(session.turns().len(), 2);
    }

    #[test]
    fn strike_rejects_user_turn() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(&interactions, &identity, &[("q1", "a1", 1)]);

        let mut session = Session::load(&identity, &interactions, &redactions).unwrap();
        let err = session.strike(0).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidRedaction { reason, .. } if reason.contains("assistant"))
        );
    }

    #[test]
    fn strike_rejects_live_fallback_pair() {
        let dir = TempDir::new().unwrap();
        let (interactions, redactions) = stores(&dir);
        let identity = alice();
        seed(&interactions, &identity, &[("q1", "a1", 1)]);

        let mut session = Session::load(&identity, &interactions, &redactions).unwrap();
        session.push(Turn::user("doomed"));
        session.push(Turn::fallback());

        let err = session.strike(3).unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidRedaction { reason, .. } if reason.contains("not part of the persisted"))
        );
        // The persisted pair is still strikeable.
        assert!(session.strike(1).is_ok());
    }

    #[test]
    fn identity_locks_are_shared_per_identity() {
        let locks = IdentityLocks::new();
        let a1 = locks.get(&alice());
        let a2 = locks.get(&alice());
        let b = locks.get(&Identity::new("bob").unwrap());
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
