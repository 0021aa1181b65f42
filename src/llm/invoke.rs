//! Single-shot model invocation used by the evaluation engine.
//!
//! Wraps an [`LlmProvider`] call with the generation parameters of a prompt,
//! a hard deadline, and response-time measurement.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::litellm::{GenerationRequest, LlmProvider, Message};
use crate::error::LlmError;

/// Default maximum tokens when a prompt does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default sampling temperature when a prompt does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Default nucleus sampling value when a prompt does not set one.
pub const DEFAULT_TOP_P: f64 = 0.9;

/// Generation parameters sent with every evaluation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            stop_sequences: Vec::new(),
        }
    }
}

/// Text returned by a successful invocation and how long it took.
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub content: String,
    pub response_time_ms: u64,
}

/// Sends `prompt` as a single user turn to `model_id` and waits at most
/// `timeout` for the answer.
///
/// # Errors
///
/// Returns `LlmError::Timeout` when the deadline passes, `LlmError::EmptyResponse`
/// when the provider answers without any choice, and the provider's error
/// otherwise.
pub async fn invoke_model(
    provider: &dyn LlmProvider,
    model_id: &str,
    prompt: &str,
    params: &GenerationParams,
    timeout: Duration,
) -> Result<ModelInvocation, LlmError> {
    let request = GenerationRequest::new(model_id, vec![Message::user(prompt)])
        .with_max_tokens(params.max_tokens)
        .with_temperature(params.temperature)
        .with_top_p(params.top_p)
        .with_stop(params.stop_sequences.clone());

    let started = Instant::now();
    let response = tokio::time::timeout(timeout, provider.generate(request))
        .await
        .map_err(|_| LlmError::Timeout(timeout.as_millis() as u64))??;
    let response_time_ms = started.elapsed().as_millis() as u64;

    let content = response
        .first_content()
        .map(str::to_string)
        .ok_or(LlmError::EmptyResponse)?;

    debug!(
        model = %model_id,
        response_time_ms,
        chars = content.len(),
        "Model invocation completed"
    );

    Ok(ModelInvocation {
        content,
        response_time_ms,
    })
}
