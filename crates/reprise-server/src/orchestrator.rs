//! Session orchestrator, connecting the engine to the server.
//!
//! The `SessionOrchestrator` trait defines the interface the RPC handlers
//! call: submitting prompts, loading transcripts, striking exchanges, and
//! cancelling or inspecting in-flight generations. `EngineOrchestrator` is
//! the production implementation that wires `GenerationController` to
//! per-identity sessions.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use reprise_core::events::SessionEvent;
use reprise_core::ids::GenerationId;
use reprise_core::turn::Turn;
use reprise_core::Identity;
use reprise_engine::error::EngineError;
use reprise_engine::generation::GenerationController;
use reprise_engine::session::{IdentityLocks, Session, StrikeOutcome};
use reprise_store::{InteractionStore, RedactionLog};

/// Parameters for submitting a prompt.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub identity: Identity,
    pub content: String,
}

/// Result of accepting a prompt.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub generation_id: GenerationId,
}

/// Current generation state for an identity.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub is_generating: bool,
}

/// Trait for orchestrating per-identity conversations.
#[async_trait]
pub trait SessionOrchestrator: Send + Sync {
    async fn submit(&self, params: SubmitParams) -> Result<SubmitReceipt, EngineError>;
    fn transcript(&self, identity: &Identity) -> Result<Vec<Turn>, EngineError>;
    fn strike(&self, identity: &Identity, index: u64) -> Result<StrikeOutcome, EngineError>;
    fn cancel(&self, identity: &Identity) -> bool;
    fn state(&self, identity: &Identity) -> GenerationState;
    fn cancel_all(&self) -> usize;
}

/// Tracks an in-flight generation.
struct ActiveGeneration {
    cancel: CancellationToken,
    generation_id: GenerationId,
    started_at: Instant,
}

/// Production orchestrator backed by the engine crates.
pub struct EngineOrchestrator {
    controller: Arc<GenerationController>,
    interactions: Arc<InteractionStore>,
    redactions: Arc<RedactionLog>,
    locks: IdentityLocks,
    event_tx: broadcast::Sender<SessionEvent>,
    active: Arc<DashMap<Identity, ActiveGeneration>>,
}

impl EngineOrchestrator {
    pub fn new(
        controller: Arc<GenerationController>,
        interactions: Arc<InteractionStore>,
        redactions: Arc<RedactionLog>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            controller,
            interactions,
            redactions,
            locks: IdentityLocks::new(),
            event_tx,
            active: Arc::new(DashMap::new()),
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::warn!("no event receivers, event dropped");
        }
    }

    /// Load the durable transcript while holding the identity lock.
    fn load_session(&self, identity: &Identity) -> Result<Session, EngineError> {
        let lock = self.locks.get(identity);
        let _guard = lock.lock();
        Session::load(identity, &self.interactions, &self.redactions)
    }
}

#[async_trait]
impl SessionOrchestrator for EngineOrchestrator {
    async fn submit(&self, params: SubmitParams) -> Result<SubmitReceipt, EngineError> {
        let SubmitParams { identity, content } = params;
        let generation_id = GenerationId::new();
        let cancel = CancellationToken::new();

        // Claim the identity's single generation slot before touching disk.
        match self.active.entry(identity.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::GenerationInFlight(identity.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveGeneration {
                    cancel: cancel.clone(),
                    generation_id: generation_id.clone(),
                    started_at: Instant::now(),
                });
            }
        }

        let session = match self.load_session(&identity) {
            Ok(session) => session,
            Err(error) => {
                self.active.remove(&identity);
                return Err(error);
            }
        };

        let controller = Arc::clone(&self.controller);
        let active = Arc::clone(&self.active);
        let task_identity = identity.clone();
        let task_id = generation_id.clone();

        // Spawn the attempt; the controller owns persistence and events
        // from here. An Err means the attempt could not be recorded at all.
        tokio::spawn(async move {
            let result = controller
                .run(&task_identity, session, content, task_id.clone(), cancel)
                .await;
            if let Err(ref error) = result {
                tracing::error!(
                    identity = %task_identity,
                    error = %error,
                    "generation attempt could not be recorded"
                );
            }
            // A cancelled attempt may already have been evicted and the
            // slot reclaimed by a newer one; only release our own.
            active.remove_if(&task_identity, |_, entry| {
                entry.generation_id == task_id
            });
        });

        Ok(SubmitReceipt { generation_id })
    }

    fn transcript(&self, identity: &Identity) -> Result<Vec<Turn>, EngineError> {
        Ok(self.load_session(identity)?.into_turns())
    }

    fn strike(&self, identity: &Identity, index: u64) -> Result<StrikeOutcome, EngineError> {
        let lock = self.locks.get(identity);
        let _guard = lock.lock();

        let mut session = Session::load(identity, &self.interactions, &self.redactions)?;
        let outcome = session.strike(index)?;
        self.redactions.append(identity, outcome.message_idx)?;

        self.send_event(SessionEvent::Redacted {
            identity: identity.clone(),
            message_idx: outcome.message_idx,
        });
        tracing::info!(
            identity = %identity,
            message_idx = outcome.message_idx,
            "exchange struck from transcript"
        );
        Ok(outcome)
    }

    fn cancel(&self, identity: &Identity) -> bool {
        if let Some((_, active)) = self.active.remove(identity) {
            active.cancel.cancel();
            tracing::info!(
                identity = %identity,
                generation_id = %active.generation_id,
                elapsed_ms = active.started_at.elapsed().as_millis() as u64,
                "generation cancelled"
            );
            true
        } else {
            false
        }
    }

    fn state(&self, identity: &Identity) -> GenerationState {
        GenerationState {
            is_generating: self.active.contains_key(identity),
        }
    }

    fn cancel_all(&self) -> usize {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel.cancel();
        }
        self.active.clear();
        count
    }
}
