use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use reprise_core::Identity;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How often the writer half pings the peer.
const PING_PERIOD: Duration = Duration::from_secs(30);
/// A connection that has not ponged within this window is treated as gone.
const PONG_DEADLINE: Duration = Duration::from_secs(90);

/// Opaque per-connection identifier, minted at registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    fn mint() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write half of one live connection. The sender is clonable and the pong
/// timestamp is atomic, so nothing here ever needs a lock.
struct ConnectionHandle {
    outbound: mpsc::Sender<String>,
    last_pong_secs: AtomicU64,
}

impl ConnectionHandle {
    fn silent_since(&self, now: u64) -> bool {
        let last = self.last_pong_secs.load(Ordering::Relaxed);
        now.saturating_sub(last) >= PONG_DEADLINE.as_secs()
    }
}

/// Tracks live WebSocket connections and which identity each one follows.
///
/// A connection starts unbound. Loading a transcript binds it to that
/// identity, after which it receives the identity's session events. The
/// bindings live in their own map so event fan-out never touches the
/// send handles of unrelated connections.
pub struct ClientRegistry {
    connections: DashMap<ClientId, ConnectionHandle>,
    bindings: DashMap<ClientId, Identity>,
    send_queue: usize,
}

impl ClientRegistry {
    pub fn new(send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            bindings: DashMap::new(),
            send_queue,
        }
    }

    /// Admit a new connection, returning its id and the outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::mint();
        let (tx, rx) = mpsc::channel(self.send_queue);
        let handle = ConnectionHandle {
            outbound: tx,
            last_pong_secs: AtomicU64::new(unix_now()),
        };
        self.connections.insert(id.clone(), handle);
        (id, rx)
    }

    /// Drop a connection along with its identity binding.
    pub fn unregister(&self, id: &ClientId) {
        self.connections.remove(id);
        self.bindings.remove(id);
    }

    /// Bind a live connection to an identity. Rebinding replaces the
    /// previous identity; unknown ids are ignored.
    pub fn bind_identity(&self, id: &ClientId, identity: Identity) {
        if self.connections.contains_key(id) {
            self.bindings.insert(id.clone(), identity);
        }
    }

    /// Queue a message for one connection. Returns false when the
    /// connection is gone or its queue is full; a full queue drops the
    /// message rather than stalling the rpc loop on a slow reader.
    pub fn send_to(&self, id: &ClientId, message: String) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        match conn.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    client_id = %id,
                    len = dropped.len(),
                    "outbound queue full, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Fan a message out to every connection bound to `identity`.
    pub fn broadcast_to_identity(&self, identity: &Identity, message: &str) {
        for bound in self.bindings.iter() {
            if bound.value() != identity {
                continue;
            }
            if let Some(conn) = self.connections.get(bound.key()) {
                let _ = conn.outbound.try_send(message.to_owned());
            }
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Ids of every connection currently bound to `identity`.
    pub fn bound_to(&self, identity: &Identity) -> Vec<ClientId> {
        self.bindings
            .iter()
            .filter(|entry| entry.value() == identity)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn record_pong(&self, id: &ClientId) {
        if let Some(conn) = self.connections.get(id) {
            conn.last_pong_secs.store(unix_now(), Ordering::Relaxed);
        }
    }

    /// Drop every connection whose last pong is past the deadline.
    /// Returns how many were dropped.
    pub fn sweep_stale(&self) -> usize {
        let now = unix_now();
        let stale: Vec<ClientId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().silent_since(now))
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.unregister(id);
            tracing::info!(client_id = %id, "dropped unresponsive connection");
        }
        stale.len()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Pump one WebSocket until either side goes away.
///
/// The socket splits into a writer that drains the outbound queue and
/// pings on a timer, and a reader that forwards text frames to the rpc
/// channel and records pongs. Whichever half exits first tears the whole
/// connection down.
pub async fn run_connection(
    socket: WebSocket,
    id: ClientId,
    mut outbound: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    inbound: mpsc::Sender<(ClientId, String)>,
) {
    let (mut sink, mut stream) = socket.split();

    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_PERIOD);
        ping.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                queued = outbound.recv() => {
                    let Some(text) = queued else { break };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    tracing::trace!(client_id = %writer_id, "ping");
                    if sink.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_id = id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                WsMessage::Text(text) => {
                    let message = (reader_id.clone(), text.to_string());
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_id),
                WsMessage::Close(_) => break,
                // Ping frames are answered by axum itself.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&id);
    tracing::info!(client_id = %id, "connection closed");
}

/// Spawn the periodic sweep that drops unresponsive connections.
pub fn spawn_sweeper(
    registry: Arc<ClientRegistry>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            let dropped = registry.sweep_stale();
            if dropped > 0 {
                tracing::info!(dropped, "stale connection sweep");
            }
        }
    })
}
