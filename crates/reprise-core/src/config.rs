use std::path::PathBuf;

use secrecy::SecretString;

use crate::backend::GenerationOptions;

pub const DEFAULT_TOKEN_BUDGET: u64 = 100_000;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Application configuration, assembled once at startup and passed into
/// constructors explicitly. Nothing below `main` reads the environment.
///
/// The token budget bounds the assistant-token sum of the context window.
/// Windows are computed at load time, so changing the budget reinterprets
/// existing transcripts on the next load.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Root directory holding one subdirectory of logs per identity.
    pub data_dir: PathBuf,
    pub token_budget: u64,
    pub model: String,
    pub base_url: String,
    /// Bearer key for the backend; absent for keyless local endpoints.
    pub api_key: Option<SecretString>,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".reprise"),
            token_budget: DEFAULT_TOKEN_BUDGET,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl AppConfig {
    /// Options forwarded to the backend for every generation.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: Some(self.temperature),
            max_output_tokens: Some(self.max_output_tokens),
        }
    }
}
