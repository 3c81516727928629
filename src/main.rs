use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tokio::sync::broadcast;

use reprise_core::config::{
    AppConfig, DEFAULT_BASE_URL, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    DEFAULT_TOKEN_BUDGET,
};
use reprise_core::events::SessionEvent;
use reprise_engine::generation::GenerationController;
use reprise_llm::OpenAiBackend;
use reprise_server::{EngineOrchestrator, ServerConfig, SessionOrchestrator};
use reprise_store::{InteractionStore, RedactionLog};
use reprise_telemetry::{init_telemetry, TelemetryConfig};

/// Resumable chat server with durable per-identity transcripts.
#[derive(Parser, Debug)]
#[command(name = "reprise", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Directory for per-identity logs. Defaults to ~/.reprise.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Assistant-token budget for the context window.
    #[arg(long, default_value_t = DEFAULT_TOKEN_BUDGET)]
    token_budget: u64,

    /// Model identifier sent to the backend.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the chat completions API.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Sampling temperature.
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,

    /// Cap on tokens generated per reply.
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
    max_output_tokens: u32,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json_output: cli.json_logs,
        ..Default::default()
    });

    tracing::info!("Starting reprise server");

    let api_key = std::env::var("REPRISE_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
        .map(SecretString::from);
    if api_key.is_none() {
        tracing::warn!("no API key in REPRISE_API_KEY or OPENAI_API_KEY, backend requests will fail");
    }

    let data_dir = cli.data_dir.unwrap_or_else(|| dirs_home().join(".reprise"));
    std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

    let config = AppConfig {
        data_dir: data_dir.clone(),
        token_budget: cli.token_budget,
        model: cli.model,
        base_url: cli.base_url,
        api_key,
        temperature: cli.temperature,
        max_output_tokens: cli.max_output_tokens,
    };
    tracing::info!(
        data_dir = %data_dir.display(),
        model = %config.model,
        token_budget = config.token_budget,
        "Configuration loaded"
    );

    // Event broadcast channel
    let (event_tx, _) = broadcast::channel::<SessionEvent>(1024);

    // Wire backend, stores, engine, and orchestrator
    let backend = Arc::new(OpenAiBackend::new(&config));
    let interactions = Arc::new(InteractionStore::new(&config.data_dir));
    let redactions = Arc::new(RedactionLog::new(&config.data_dir));
    let controller = Arc::new(GenerationController::new(
        backend,
        Arc::clone(&interactions),
        event_tx.clone(),
        config.generation_options(),
        config.token_budget,
    ));
    let orchestrator: Arc<dyn SessionOrchestrator> = Arc::new(EngineOrchestrator::new(
        controller,
        interactions,
        redactions,
        event_tx.clone(),
    ));

    // Start server
    let server_config = ServerConfig {
        port: cli.port,
        ..Default::default()
    };
    let handle = reprise_server::start(server_config, Arc::clone(&orchestrator), event_tx)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "Reprise server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    let cancelled = orchestrator.cancel_all();
    tracing::info!(cancelled = cancelled, "Shutting down");
    handle.shutdown();
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
