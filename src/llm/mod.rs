//! Language model access and test generation.

pub mod extract;
pub mod generator;
pub mod ollama;
pub mod openai;
pub mod prompts;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::ConfigError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use generator::{GeneratedTest, RetryPolicy, TestGenerator};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use prompts::Protocol;

/// Raw completion returned by an endpoint.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Model that actually answered, as reported by the endpoint
    pub model: String,
}

/// Transport or protocol-level failure talking to an LLM endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("missing credentials: set QUALITYGATE_LLM_API_KEY or OPENAI_API_KEY")]
    Credentials,

    #[error("model `{model}` is not available (found: {available})")]
    ModelMissing { model: String, available: String },
}

impl LlmError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(e) => e.is_connect() || e.is_timeout(),
            LlmError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// A chat/completion endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Send a single prompt and return the completion text.
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;

    /// Verify the endpoint answers and serves the configured model.
    async fn check_available(&self) -> Result<(), LlmError>;
}

/// Build the client selected by `llm.provider`.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, ConfigError> {
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| ConfigError::Invalid {
            key: "llm",
            reason: format!("cannot build HTTP client: {}", e),
        })?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaClient::new(http, config)),
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(http, config)),
    };
    tracing::debug!(
        "Using {} model {} at {}",
        client.provider(),
        client.model(),
        config.endpoint_url()
    );
    Ok(client)
}
