use std::sync::Arc;

use reprise_core::events::SessionEvent;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

/// Spawn the pump that relays engine session events to the WebSocket
/// connections bound to each event's identity.
///
/// Events are serialized once and fanned out through the registry. A
/// lagged receiver skips ahead rather than stalling the engine side of
/// the broadcast channel.
pub fn spawn_event_pump(
    registry: Arc<ClientRegistry>,
    mut events: broadcast::Receiver<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event pump fell behind, events skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match serde_json::to_string(&event) {
                Ok(wire) => registry.broadcast_to_identity(event.identity(), &wire),
                Err(error) => {
                    tracing::error!(error = %error, "session event failed to serialize");
                }
            }
        }
        tracing::debug!("event pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use reprise_core::ids::GenerationId;
    use reprise_core::turn::Turn;
    use reprise_core::Identity;
    use tokio::time::timeout;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    #[test]
    fn turn_start_wire_shape() {
        let event = SessionEvent::TurnStart {
            identity: alice(),
            generation_id: GenerationId::new(),
            user_turn: Turn::user("Hi"),
        };
        let wire: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(wire["type"], "turn_start");
        assert_eq!(wire["identity"], "alice");
        assert_eq!(wire["user_turn"]["content"], "Hi");
    }

    #[test]
    fn delta_wire_shape() {
        let event = SessionEvent::Delta {
            identity: alice(),
            generation_id: GenerationId::new(),
            text: "Hel".into(),
        };
        let wire: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(wire["type"], "delta");
        assert_eq!(wire["text"], "Hel");
    }

    #[tokio::test]
    async fn pump_delivers_events_to_bound_connection() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (events_tx, events_rx) = broadcast::channel(16);
        let pump = spawn_event_pump(Arc::clone(&registry), events_rx);

        let (id, mut rx) = registry.register();
        registry.bind_identity(&id, alice());

        events_tx
            .send(SessionEvent::Delta {
                identity: alice(),
                generation_id: GenerationId::new(),
                text: "Hello".into(),
            })
            .unwrap();

        let wire = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("pump should deliver within the deadline")
            .unwrap();
        assert!(wire.contains("\"delta\""));
        assert!(wire.contains("Hello"));

        pump.abort();
    }

    #[tokio::test]
    async fn pump_skips_other_identities() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (events_tx, events_rx) = broadcast::channel(16);
        let _pump = spawn_event_pump(Arc::clone(&registry), events_rx);

        let (id, mut rx) = registry.register();
        registry.bind_identity(&id, Identity::new("bob").unwrap());

        events_tx
            .send(SessionEvent::Redacted {
                identity: alice(),
                message_idx: 1,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pump_ignores_unbound_connections() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (events_tx, events_rx) = broadcast::channel(16);
        let _pump = spawn_event_pump(Arc::clone(&registry), events_rx);

        // Registered but never bound to an identity.
        let (_id, mut rx) = registry.register();

        events_tx
            .send(SessionEvent::Redacted {
                identity: alice(),
                message_idx: 1,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(rx.try_recv().is_err());
    }
}
