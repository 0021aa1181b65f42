//! Evaluation execution engine.
//!
//! Runs a prompt against every message of a labelled dataset through an
//! LLM provider, stores one result per message and derives accuracy:
//!
//! - **EvaluationService**: lifecycle operations (start, resume, stop, reset,
//!   retry errors, rerun, status diagnosis)
//! - **run_pass**: bounded-concurrency scheduler over the pending messages
//! - **MessageProcessor**: per-message model calls with retries and cooldown
//! - **Throttle**: cooldown after failures and decaying rate-limit backoff,
//!   shared by all passes of a service
//! - **extract_label / calculate_stats**: verdict parsing and accuracy
//!
//! # Architecture
//!
//! ```text
//!   EvaluationService ──launch──▶ RunRegistry ──spawn──▶ run_pass
//!          │                                               │
//!          │ status writes                    JoinSet of MessageProcessor tasks
//!          ▼                                               │
//!   SerializedStore ◀───────── results / progress ─────────┘
//!          │                                               │
//!          ▼                                               ▼
//!   EvaluationStore                               EventBroadcaster
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prompt_eval::evaluation::{EngineConfig, EvaluationService, NewEvaluationRequest};
//! use prompt_eval::llm::LiteLlmClient;
//! use prompt_eval::storage::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::open("evaluations.db").await?);
//! let provider = Arc::new(LiteLlmClient::from_env()?);
//! let service = EvaluationService::new(store.clone(), store, provider, EngineConfig::from_env()?)?;
//!
//! let evaluation = service
//!     .create_evaluation(
//!         NewEvaluationRequest { name: "spam v2".into(), description: None, prompt_id: 1, dataset_id: 1 },
//!         "alice",
//!     )
//!     .await?;
//! service.start(evaluation.id, "alice").await?;
//! let outcome = service.wait_for_run(evaluation.id).await;
//! ```

pub mod config;
pub mod extractor;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod throttle;
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use extractor::extract_label;
pub use progress::{flush_progress, HeartbeatMonitor, ProgressTracker};
pub use registry::{RunOutcome, RunRegistry, StopSignal};
pub use retry::{MessageProcessor, ProcessedMessage};
pub use scheduler::{run_pass, PassContext, PassMode, PassOutcome};
pub use service::EvaluationService;
pub use stats::{accuracy, calculate_stats};
pub use throttle::Throttle;
pub use types::{
    DatasetMessage, Evaluation, EvaluationResult, EvaluationStats, EvaluationStatus,
    NewEvaluation, NewEvaluationRequest, NewEvaluationResult, ObservedStatus, ProgressReport,
    PromptConfig, ResultFilter, StatusReport, StatusUpdate, TimingReport, MESSAGE_PLACEHOLDER,
};
