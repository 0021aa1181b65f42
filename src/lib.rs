//! prompt-eval: evaluation execution engine for prompt classifiers.
//!
//! This library runs a prompt template against every message of a labelled
//! dataset through an LLM provider, records one result per message, and
//! tracks the run through its lifecycle with live progress events.

pub mod cli;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod llm;
pub mod metrics;
pub mod storage;

// Re-export commonly used error types
pub use error::{ErrorKind, EvaluationError, LlmError, StoreError};

// Re-export the engine entry points
pub use evaluation::{
    EngineConfig, Evaluation, EvaluationResult, EvaluationService, EvaluationStatus, RunOutcome,
    StatusReport,
};
pub use events::{EvaluationEvent, EventBroadcaster, Subscription};
pub use storage::{EvaluationStore, MemoryStore, SqliteStore};
