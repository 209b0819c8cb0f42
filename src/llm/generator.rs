//! Test generation with retry on transient endpoint failures.

use super::extract::extract_code;
use super::prompts::{build_prompt, Protocol};
use super::{LlmClient, LlmError};
use crate::config::LlmConfig;
use crate::error::GenerationError;
use crate::evaluation::Module;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Test source produced by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTest {
    #[serde(skip)]
    pub source: String,
    /// Wall time from first request to validated output, retries included
    pub latency_ms: u64,
    pub model: String,
    pub protocol: Protocol,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Generates tests for modules through an [`LlmClient`].
pub struct TestGenerator {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl TestGenerator {
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Generate a test for `module`.
    ///
    /// Connectivity failures are retried with exponential backoff. Output
    /// that is empty or lacks a test is returned as an error right away.
    pub async fn generate(
        &self,
        module: &Module,
        protocol: Protocol,
    ) -> Result<GeneratedTest, GenerationError> {
        let prompt = build_prompt(module, protocol);
        let started = Instant::now();
        let mut attempts = 0;

        tracing::info!(
            "Generating {} tests for {} with {} ({} protocol)",
            module.language,
            module.id,
            self.client.model(),
            protocol
        );

        let completion = loop {
            attempts += 1;
            match self.client.complete(&prompt).await {
                Ok(completion) => break completion,
                Err(e) if e.is_transient() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.backoff(attempts - 1);
                    tracing::warn!(
                        "LLM request failed (attempt {}), retrying in {:?}: {}",
                        attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(classify(e, attempts)),
            }
        };

        let source = extract_code(&completion.text, module.language);
        if source.trim().is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        module
            .language
            .validate_test(&source)
            .map_err(|reason| GenerationError::MalformedOutput {
                language: module.language,
                reason,
            })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Generated {} lines for {} in {}ms ({} attempt(s))",
            source.lines().count(),
            module.id,
            latency_ms,
            attempts
        );

        Ok(GeneratedTest {
            source,
            latency_ms,
            model: completion.model,
            protocol,
            attempts,
        })
    }
}

fn classify(error: LlmError, attempts: u32) -> GenerationError {
    if error.is_transient() {
        GenerationError::Unreachable {
            attempts,
            message: error.to_string(),
        }
    } else {
        GenerationError::Rejected(error.to_string())
    }
}
