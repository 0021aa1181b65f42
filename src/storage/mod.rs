//! Persistent storage for evaluations, results and the catalogs they read.
//!
//! # Overview
//!
//! - [`EvaluationStore`]: evaluation rows and their per-message results
//! - [`PromptCatalog`] / [`DatasetCatalog`]: read-only inputs of a run
//! - [`SqliteStore`]: sqlx/SQLite implementation of all three, with migrations
//! - [`MemoryStore`]: in-process implementation for tests and dry runs
//! - [`SerializedStore`]: funnels every write through a single-writer queue
//!
//! # Usage
//!
//! ```rust,ignore
//! use prompt_eval::storage::{NewPrompt, SqliteStore};
//!
//! let store = SqliteStore::open("evaluations.db").await?;
//! let prompt = store
//!     .insert_prompt(NewPrompt::new("spam", "gpt-4o-mini", "Is this spam? {{messageContent}}", "<answer>", "</answer>"))
//!     .await?;
//! let dataset_id = store
//!     .insert_dataset("inbox", &[("win a prize".to_string(), true)])
//!     .await?;
//! ```

pub mod database;
pub mod memory;
pub mod migrations;
pub mod schema;
pub mod write_queue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::evaluation::{
    DatasetMessage, Evaluation, EvaluationResult, EvaluationStatus, NewEvaluation,
    NewEvaluationResult, PromptConfig, ResultFilter, StatusUpdate,
};

pub use database::SqliteStore;
pub use memory::MemoryStore;
pub use migrations::MigrationRunner;
pub use write_queue::{SerializedStore, WriteQueue};

/// Evaluation rows and their per-message results.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<Evaluation, StoreError>;

    async fn get_evaluation(&self, id: i64) -> Result<Option<Evaluation>, StoreError>;

    /// Removes an evaluation and all of its results.
    async fn delete_evaluation(&self, id: i64) -> Result<(), StoreError>;

    /// Writes `status` plus the fields set in `update`, returning the new row.
    async fn update_status(
        &self,
        id: i64,
        status: EvaluationStatus,
        update: StatusUpdate,
    ) -> Result<Evaluation, StoreError>;

    async fn update_progress(
        &self,
        id: i64,
        processed_messages: i64,
        total_time_ms: i64,
    ) -> Result<(), StoreError>;

    async fn touch_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Stores the result for one message, replacing an earlier one for the
    /// same message.
    async fn insert_result(&self, result: NewEvaluationResult)
        -> Result<EvaluationResult, StoreError>;

    /// All results of an evaluation, ordered by message id.
    async fn list_results(&self, evaluation_id: i64) -> Result<Vec<EvaluationResult>, StoreError>;

    /// Deletes results and returns how many were removed.
    async fn delete_results(&self, evaluation_id: i64, filter: ResultFilter)
        -> Result<u64, StoreError>;

    async fn count_results(&self, evaluation_id: i64, filter: ResultFilter)
        -> Result<u64, StoreError>;
}

/// Read access to prompt configurations.
#[async_trait]
pub trait PromptCatalog: Send + Sync {
    async fn get_prompt(&self, id: i64) -> Result<Option<PromptConfig>, StoreError>;
}

/// Read access to labelled datasets.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn dataset_exists(&self, dataset_id: i64) -> Result<bool, StoreError>;

    /// Messages of a dataset ordered by id.
    async fn dataset_messages(&self, dataset_id: i64) -> Result<Vec<DatasetMessage>, StoreError>;
}

/// Both catalogs behind one handle.
pub trait Catalog: PromptCatalog + DatasetCatalog {}

impl<T: PromptCatalog + DatasetCatalog + ?Sized> Catalog for T {}

/// Prompt definition used to seed a catalog.
#[derive(Debug, Clone)]
pub struct NewPrompt {
    pub name: String,
    pub model_id: String,
    pub prompt_text: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub opening_tag: String,
    pub closing_tag: String,
}

impl NewPrompt {
    pub fn new(
        name: impl Into<String>,
        model_id: impl Into<String>,
        prompt_text: impl Into<String>,
        opening_tag: impl Into<String>,
        closing_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            prompt_text: prompt_text.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
            opening_tag: opening_tag.into(),
            closing_tag: closing_tag.into(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }

    /// Materializes the prompt under `id`.
    pub(crate) fn into_config(self, id: i64) -> PromptConfig {
        PromptConfig {
            id,
            name: self.name,
            model_id: self.model_id,
            prompt_text: self.prompt_text,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            stop_sequences: self.stop_sequences,
            opening_tag: self.opening_tag,
            closing_tag: self.closing_tag,
        }
    }
}
