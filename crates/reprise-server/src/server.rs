use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use reprise_core::events::SessionEvent;
use reprise_core::Identity;

use crate::client::{self, ClientId, ClientRegistry};
use crate::event_bridge::spawn_event_pump;
use crate::handlers::{self, HandlerState};
use crate::orchestrator::SessionOrchestrator;
use crate::rpc::{RpcRequest, RpcResponse};

/// How often the registry sweeps for unresponsive connections.
const SWEEP_PERIOD: Duration = Duration::from_secs(60);
/// Depth of the shared inbound rpc queue.
const INBOUND_QUEUE: usize = 1024;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            send_queue: 256,
        }
    }
}

/// State shared by the axum routes.
#[derive(Clone)]
struct WsState {
    registry: Arc<ClientRegistry>,
    handlers: Arc<HandlerState>,
    inbound: mpsc::Sender<(ClientId, String)>,
}

/// Bind the listener and bring up the server stack.
///
/// The bind happens before any background task spawns, so a taken port
/// fails cleanly instead of leaving orphan tasks behind.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<dyn SessionOrchestrator>,
    events: broadcast::Sender<SessionEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    let port = listener.local_addr()?.port();

    let registry = Arc::new(ClientRegistry::new(config.send_queue));
    let handlers = Arc::new(HandlerState::new(orchestrator));

    let pump = spawn_event_pump(Arc::clone(&registry), events.subscribe());
    let sweeper = client::spawn_sweeper(Arc::clone(&registry), SWEEP_PERIOD);

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let rpc_loop = tokio::spawn(run_rpc_loop(
        inbound_rx,
        Arc::clone(&handlers),
        Arc::clone(&registry),
    ));

    let router = build_router(WsState {
        registry,
        handlers,
        inbound: inbound_tx,
    });

    tracing::info!(port, "reprise server listening");

    let serve = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!(error = %error, "server exited");
        }
    });

    Ok(ServerHandle {
        port,
        serve,
        pump,
        sweeper,
        rpc_loop,
    })
}

/// Running server plus its background tasks. Callers read the bound port
/// from it; tests tear the whole stack down through [`ServerHandle::shutdown`].
pub struct ServerHandle {
    pub port: u16,
    serve: JoinHandle<()>,
    pump: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    rpc_loop: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop the listener and every background task.
    pub fn shutdown(self) {
        self.serve.abort();
        self.rpc_loop.abort();
        self.pump.abort();
        self.sweeper.abort();
    }
}

fn build_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(upgrade_ws))
        .route("/health", get(http_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn upgrade_ws(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| attach_client(socket, state))
}

async fn attach_client(socket: WebSocket, state: WsState) {
    let (id, outbound) = state.registry.register();
    tracing::info!(client_id = %id, "websocket client connected");
    client::run_connection(socket, id, outbound, state.registry, state.inbound).await;
}

async fn http_health(State(state): State<WsState>) -> Json<serde_json::Value> {
    Json(handlers::health_payload(&state.handlers))
}

/// Drain the inbound queue: parse, dispatch, reply on the sender's queue.
async fn run_rpc_loop(
    mut inbound: mpsc::Receiver<(ClientId, String)>,
    handlers: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw)) = inbound.recv().await {
        let response = match serde_json::from_str::<RpcRequest>(&raw) {
            Ok(request) => handle_request(&handlers, &registry, &client_id, request).await,
            Err(_) => RpcResponse::parse_error(),
        };
        match serde_json::to_string(&response) {
            Ok(wire) => {
                registry.send_to(&client_id, wire);
            }
            Err(error) => {
                tracing::error!(error = %error, "rpc response failed to serialize");
            }
        }
    }
}

/// Dispatch one request and apply its connection-level side effects.
async fn handle_request(
    handlers: &Arc<HandlerState>,
    registry: &ClientRegistry,
    client_id: &ClientId,
    request: RpcRequest,
) -> RpcResponse {
    let params = request.params.unwrap_or_else(|| serde_json::json!({}));
    let response = handlers::dispatch(handlers, &request.method, &params, request.id).await;

    // A successful transcript.load binds this connection to the loaded
    // identity so its session events start flowing here.
    if request.method == "transcript.load" && response.success {
        let identity = params
            .get("identity")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| Identity::new(raw).ok());
        if let Some(identity) = identity {
            registry.bind_identity(client_id, identity);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::MockOrchestrator;

    fn test_state() -> (Arc<ClientRegistry>, Arc<HandlerState>) {
        (
            Arc::new(ClientRegistry::new(8)),
            Arc::new(HandlerState::new(Arc::new(MockOrchestrator::new()))),
        )
    }

    #[tokio::test]
    async fn health_endpoint_round_trip() {
        let (events_tx, _) = broadcast::channel(16);
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, Arc::new(MockOrchestrator::new()), events_tx)
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());

        handle.shutdown();
    }

    #[tokio::test]
    async fn rpc_loop_answers_malformed_input_with_parse_error() {
        let (registry, handlers) = test_state();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_rpc_loop(rx, handlers, Arc::clone(&registry)));

        let (client_id, mut outbound) = registry.register();
        tx.send((client_id, "{ not json".into())).await.unwrap();

        let wire = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("rpc loop should answer")
            .unwrap();
        assert!(wire.contains("PARSE_ERROR"));
        task.abort();
    }

    #[tokio::test]
    async fn unknown_method_gets_method_not_found() {
        let (registry, handlers) = test_state();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_rpc_loop(rx, handlers, Arc::clone(&registry)));

        let (client_id, mut outbound) = registry.register();
        let raw = r#"{"method":"nope","id":2}"#;
        tx.send((client_id, raw.into())).await.unwrap();

        let wire = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("rpc loop should answer")
            .unwrap();
        assert!(wire.contains("METHOD_NOT_FOUND"));
        task.abort();
    }

    #[tokio::test]
    async fn transcript_load_binds_connection_to_identity() {
        let (registry, handlers) = test_state();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_rpc_loop(rx, handlers, Arc::clone(&registry)));

        let (client_id, mut outbound) = registry.register();
        let raw = r#"{"method":"transcript.load","params":{"identity":"alice"},"id":1}"#;
        tx.send((client_id.clone(), raw.into())).await.unwrap();

        let wire = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("rpc loop should answer")
            .unwrap();
        assert!(wire.contains("\"success\":true"));

        let bound = registry.bound_to(&Identity::new("alice").unwrap());
        assert_eq!(bound, vec![client_id]);
        task.abort();
    }
}
