//! Logging initialization for the reprise binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Baseline level when RUST_LOG is unset.
    pub default_level: Level,
    /// Per-target level overrides, e.g. `("reprise_llm", DEBUG)`.
    pub overrides: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            overrides: Vec::new(),
            json_output: false,
        }
    }
}

/// Install the global tracing subscriber. Call once at startup; RUST_LOG
/// takes precedence over the configured levels.
pub fn init_telemetry(config: TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let fmt = tracing_subscriber::fmt::layer().with_target(true);
    if config.json_output {
        tracing_subscriber::registry()
            .with(fmt.json().with_span_list(true).with_filter(filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt.with_filter(filter))
            .init();
    }
}

fn filter_directives(config: &TelemetryConfig) -> String {
    std::iter::once(config.default_level.to_string().to_lowercase())
        .chain(config.overrides.iter().map(|(target, level)| {
            format!("{target}={}", level.to_string().to_lowercase())
        }))
        .collect::<Vec<_>>()
        .join(",")
}
