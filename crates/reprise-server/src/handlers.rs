//! RPC method handlers.

use std::sync::Arc;
use std::time::Instant;

use reprise_core::Identity;
use reprise_engine::EngineError;

use crate::orchestrator::{SessionOrchestrator, SubmitParams};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub orchestrator: Arc<dyn SessionOrchestrator>,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(orchestrator: Arc<dyn SessionOrchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

/// Why a handler could not produce a result. Dispatch turns this into the
/// wire error, so handlers themselves never touch the request id.
enum HandlerError {
    Params(String),
    Engine(EngineError),
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Params(message)
    }
}

impl From<EngineError> for HandlerError {
    fn from(error: EngineError) -> Self {
        HandlerError::Engine(error)
    }
}

type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Route a method name to its handler and assemble the response envelope.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let outcome = match method {
        "chat.submit" => chat_submit(state, params).await,
        "chat.cancel" => chat_cancel(state, params),
        "chat.state" => chat_state(state, params),
        "chat.strike" => chat_strike(state, params),
        "transcript.load" => transcript_load(state, params),
        "health" => Ok(health_payload(state)),
        _ => return RpcResponse::method_not_found(id, method),
    };

    match outcome {
        Ok(result) => RpcResponse::ok(id, result),
        Err(HandlerError::Params(message)) => RpcResponse::invalid_params(id, message),
        Err(HandlerError::Engine(error)) => RpcResponse::engine_error(id, &error),
    }
}

fn parse_identity(params: &serde_json::Value) -> Result<Identity, HandlerError> {
    let raw = rpc::str_param(params, "identity")?;
    Identity::new(raw).map_err(|error| HandlerError::Params(error.to_string()))
}

async fn chat_submit(state: &HandlerState, params: &serde_json::Value) -> HandlerResult {
    let identity = parse_identity(params)?;
    let content = rpc::str_param(params, "content")?.to_string();

    let receipt = state
        .orchestrator
        .submit(SubmitParams { identity, content })
        .await?;
    Ok(serde_json::json!({
        "acknowledged": true,
        "generation_id": receipt.generation_id,
    }))
}

fn chat_cancel(state: &HandlerState, params: &serde_json::Value) -> HandlerResult {
    let identity = parse_identity(params)?;
    let cancelled = state.orchestrator.cancel(&identity);
    Ok(serde_json::json!({ "cancelled": cancelled }))
}

fn chat_state(state: &HandlerState, params: &serde_json::Value) -> HandlerResult {
    let identity = parse_identity(params)?;
    let generation = state.orchestrator.state(&identity);
    Ok(serde_json::json!({ "is_generating": generation.is_generating }))
}

fn chat_strike(state: &HandlerState, params: &serde_json::Value) -> HandlerResult {
    let identity = parse_identity(params)?;
    let index = rpc::u64_param(params, "message_idx")?;

    let outcome = state.orchestrator.strike(&identity, index)?;
    Ok(serde_json::json!({
        "message_idx": outcome.message_idx,
        "remaining_turns": outcome.remaining_turns,
    }))
}

fn transcript_load(state: &HandlerState, params: &serde_json::Value) -> HandlerResult {
    let identity = parse_identity(params)?;
    let turns = state.orchestrator.transcript(&identity)?;
    Ok(serde_json::json!({
        "identity": identity,
        "turns": turns,
    }))
}

/// Health summary shared by the `health` RPC method and the HTTP endpoint.
pub fn health_payload(state: &HandlerState) -> serde_json::Value {
    serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    })
}
