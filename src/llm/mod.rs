//! LLM integration for prompt-eval.
//!
//! This module provides the provider abstraction the evaluation engine calls
//! into, a LiteLLM/OpenAI-compatible client, and the single-shot invocation
//! adapter that applies generation parameters and a hard timeout.
//!
//! ```ignore
//! use prompt_eval::llm::{invoke_model, GenerationParams, LiteLlmClient};
//! use std::time::Duration;
//!
//! let client = LiteLlmClient::from_env()?;
//! let result = invoke_model(
//!     &client,
//!     "gpt-4o-mini",
//!     "Is this message spam? <answer>true|false</answer>",
//!     &GenerationParams::default(),
//!     Duration::from_secs(300),
//! )
//! .await?;
//! println!("{} ({}ms)", result.content, result.response_time_ms);
//! ```

pub mod invoke;
pub mod litellm;

pub use invoke::{
    invoke_model, GenerationParams, ModelInvocation, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_P,
};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
