use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use reprise_core::backend::{ChatBackend, ChatMessage, GenerationOptions};
use reprise_core::chunk::CompletionChunk;
use reprise_core::events::SessionEvent;
use reprise_core::ids::GenerationId;
use reprise_core::tokens::TokenUsage;
use reprise_core::turn::Turn;
use reprise_core::Identity;
use reprise_store::{InteractionRecord, InteractionStore};

use crate::error::EngineError;
use crate::session::Session;
use crate::window::build_window;

/// What a finished generation attempt produced.
pub struct GenerationOutcome {
    pub generation_id: GenerationId,
    /// The assistant turn appended to the live transcript; the fallback
    /// turn when the attempt failed.
    pub turn: Turn,
    /// The live session including the new pair.
    pub session: Session,
}

/// Drives one generation attempt end to end: window the transcript, stream
/// the reply, persist exactly one record, emit lifecycle events.
///
/// Every attempt ends in exactly one of two ways. Either a completion chunk
/// arrived and the accumulated text is recorded as an ok exchange, or
/// anything else happened (dispatch failure, error chunk, early close,
/// cancellation) and a failed record plus the fallback turn take its place.
/// The record hits disk before the terminal event goes out.
pub struct GenerationController {
    backend: Arc<dyn ChatBackend>,
    interactions: Arc<InteractionStore>,
    event_tx: broadcast::Sender<SessionEvent>,
    options: GenerationOptions,
    token_budget: u64,
}

impl GenerationController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        interactions: Arc<InteractionStore>,
        event_tx: broadcast::Sender<SessionEvent>,
        options: GenerationOptions,
        token_budget: u64,
    ) -> Self {
        Self {
            backend,
            interactions,
            event_tx,
            options,
            token_budget,
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no event receivers, event dropped");
        }
    }

    /// Run one generation attempt for `identity` over `session`.
    ///
    /// Consumes the session, appends the new user turn and the produced
    /// assistant turn to it, and hands it back in the outcome. Callers that
    /// need the durable transcript reload it instead. The caller supplies
    /// `generation_id` so the events it already handed out stay consistent.
    #[instrument(skip_all, fields(identity = %identity, generation_id = %generation_id, backend = self.backend.name()))]
    pub async fn run(
        &self,
        identity: &Identity,
        mut session: Session,
        content: String,
        generation_id: GenerationId,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, EngineError> {
        let user_turn = Turn::user(content.clone());

        // 1. Announce the attempt and extend the live transcript
        self.send_event(SessionEvent::TurnStart {
            identity: identity.clone(),
            generation_id: generation_id.clone(),
            user_turn: user_turn.clone(),
        });
        session.push(user_turn);

        // 2. Window the transcript and build the prompt
        let window = build_window(session.turns(), self.token_budget);
        tracing::debug!(
            transcript_turns = session.turns().len(),
            window_turns = window.len(),
            "context window selected"
        );
        let messages: Vec<ChatMessage> = window.iter().map(ChatMessage::from).collect();

        // 3. Stream the reply, stopping at the first terminal outcome
        let mut acc = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut failure: Option<String> = None;

        let dispatch = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.backend.stream(&messages, &self.options) => Some(result),
        };

        match dispatch {
            None => failure = Some("cancelled".to_string()),
            Some(Err(error)) => failure = Some(error.to_string()),
            Some(Ok(mut stream)) => loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        failure = Some("cancelled".to_string());
                        break;
                    }
                    chunk = stream.next() => match chunk {
                        Some(chunk) => chunk,
                        // Early close; the reason defaults below
                        None => break,
                    },
                };

                match chunk {
                    CompletionChunk::Delta { text } => {
                        acc.push_str(&text);
                        self.send_event(SessionEvent::Delta {
                            identity: identity.clone(),
                            generation_id: generation_id.clone(),
                            text,
                        });
                    }
                    CompletionChunk::Completed { usage: attempt_usage } => {
                        usage = Some(attempt_usage);
                        break;
                    }
                    CompletionChunk::Error { error } => {
                        failure = Some(error.message);
                        break;
                    }
                }
            },
        }

        // 4. Persist exactly one record for the attempt, then emit the
        //    terminal event, so a subscriber acting on the event always
        //    observes the record.
        match usage {
            Some(usage) => {
                let turn = Turn::assistant(acc, usage.total());
                let record = InteractionRecord::ok(content, turn.content(), usage.total());
                if let Err(error) = self.interactions.append(identity, &record) {
                    self.send_event(SessionEvent::TurnFailed {
                        identity: identity.clone(),
                        generation_id: generation_id.clone(),
                        turn: Turn::fallback(),
                        reason: format!("failed to persist reply: {error}"),
                    });
                    return Err(error.into());
                }
                session.push(turn.clone());
                self.send_event(SessionEvent::TurnComplete {
                    identity: identity.clone(),
                    generation_id: generation_id.clone(),
                    turn: turn.clone(),
                });
                Ok(GenerationOutcome {
                    generation_id,
                    turn,
                    session,
                })
            }
            None => {
                let reason = failure
                    .unwrap_or_else(|| "stream ended before completion".to_string());
                let turn = Turn::fallback();
                let record = InteractionRecord::failed(content);
                if let Err(error) = self.interactions.append(identity, &record) {
                    self.send_event(SessionEvent::TurnFailed {
                        identity: identity.clone(),
                        generation_id: generation_id.clone(),
                        turn: turn.clone(),
                        reason: format!("{reason}; record not persisted: {error}"),
                    });
                    return Err(error.into());
                }
                session.push(turn.clone());
                self.send_event(SessionEvent::TurnFailed {
                    identity: identity.clone(),
                    generation_id: generation_id.clone(),
                    turn: turn.clone(),
                    reason,
                });
                Ok(GenerationOutcome {
                    generation_id,
                    turn,
                    session,
                })
            }
        }
    }
}
