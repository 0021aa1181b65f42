//! Core data types for evaluation runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{GenerationParams, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};

/// Placeholder in a prompt template that receives the dataset message.
pub const MESSAGE_PLACEHOLDER: &str = "{{messageContent}}";

/// Persisted lifecycle status of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl EvaluationStatus {
    /// Returns the storage representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Running => "running",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
            EvaluationStatus::Paused => "paused",
        }
    }

    /// Returns true for statuses a pass never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EvaluationStatus::Pending),
            "running" => Ok(EvaluationStatus::Running),
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            "paused" => Ok(EvaluationStatus::Paused),
            other => Err(format!("unknown evaluation status '{}'", other)),
        }
    }
}

/// Status reported by `validate_status`, including the observed-only states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Stuck,
    Timeout,
}

impl From<EvaluationStatus> for ObservedStatus {
    fn from(status: EvaluationStatus) -> Self {
        match status {
            EvaluationStatus::Pending => ObservedStatus::Pending,
            EvaluationStatus::Running => ObservedStatus::Running,
            EvaluationStatus::Completed => ObservedStatus::Completed,
            EvaluationStatus::Failed => ObservedStatus::Failed,
            EvaluationStatus::Paused => ObservedStatus::Paused,
        }
    }
}

/// One evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub prompt_id: i64,
    pub dataset_id: i64,
    /// Stop sequences captured from the prompt when the run was created.
    pub stop_sequences: Vec<String>,
    pub status: EvaluationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub can_resume: bool,
    pub failure_reason: Option<String>,
    pub total_messages: i64,
    pub processed_messages: i64,
    pub correct_predictions: Option<i64>,
    pub incorrect_predictions: i64,
    pub error_count: Option<i64>,
    pub accuracy: Option<f64>,
    pub total_time_ms: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    /// Percentage of messages processed, rounded to the nearest integer.
    pub fn progress_percentage(&self) -> i64 {
        if self.total_messages <= 0 {
            return 0;
        }
        ((self.processed_messages as f64 / self.total_messages as f64) * 100.0).round() as i64
    }
}

/// Fields required to insert a new evaluation row.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub name: String,
    pub description: Option<String>,
    pub prompt_id: i64,
    pub dataset_id: i64,
    pub stop_sequences: Vec<String>,
    pub total_messages: i64,
    pub created_by: String,
}

/// Caller-facing request to create an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvaluationRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt_id: i64,
    pub dataset_id: i64,
}

/// Persisted outcome for one dataset message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: i64,
    pub evaluation_id: i64,
    pub dataset_message_id: i64,
    pub llm_label: Option<bool>,
    pub llm_full_response: Option<String>,
    pub response_time_ms: i64,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Result row before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluationResult {
    pub evaluation_id: i64,
    pub dataset_message_id: i64,
    pub llm_label: Option<bool>,
    pub llm_full_response: Option<String>,
    pub response_time_ms: i64,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

impl NewEvaluationResult {
    /// A model answer, whether or not a label could be extracted from it.
    pub fn answered(
        evaluation_id: i64,
        dataset_message_id: i64,
        llm_label: Option<bool>,
        response: String,
        response_time_ms: u64,
        retry_count: u32,
    ) -> Self {
        Self {
            evaluation_id,
            dataset_message_id,
            llm_label,
            llm_full_response: Some(response),
            response_time_ms: response_time_ms as i64,
            error_message: None,
            retry_count: retry_count as i64,
        }
    }

    /// An error row written after every attempt failed.
    pub fn failed(
        evaluation_id: i64,
        dataset_message_id: i64,
        error_message: String,
        retry_count: u32,
    ) -> Self {
        Self {
            evaluation_id,
            dataset_message_id,
            llm_label: None,
            llm_full_response: None,
            response_time_ms: 0,
            error_message: Some(error_message),
            retry_count: retry_count as i64,
        }
    }
}

/// A labelled dataset message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMessage {
    pub id: i64,
    pub message_content: String,
    pub label: bool,
}

/// Prompt configuration read from the prompt catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub id: i64,
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

impl PromptConfig {
    /// Substitutes the first placeholder occurrence with `message_content`.
    pub fn render(&self, message_content: &str) -> String {
        self.prompt_text.replacen(MESSAGE_PLACEHOLDER, message_content, 1)
    }

    /// Generation parameters for this prompt.
    ///
    /// `captured_stop_sequences` are the evaluation's copy; the prompt's own
    /// list is used only when that copy is empty.
    pub fn generation_params(&self, captured_stop_sequences: &[String]) -> GenerationParams {
        let stop_sequences = if captured_stop_sequences.is_empty() {
            self.stop_sequences.clone()
        } else {
            captured_stop_sequences.to_vec()
        };

        GenerationParams {
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            stop_sequences,
        }
    }
}

/// Which result rows a store operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFilter {
    All,
    ErrorsOnly,
}

/// Final scoring of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub total: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub errors: i64,
    pub accuracy: f64,
}

/// Partial update applied together with a status write.
///
/// `None` leaves a column untouched; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub last_heartbeat: Option<Option<DateTime<Utc>>>,
    pub timeout_at: Option<Option<DateTime<Utc>>>,
    pub can_resume: Option<bool>,
    pub failure_reason: Option<Option<String>>,
    pub processed_messages: Option<i64>,
    pub correct_predictions: Option<Option<i64>>,
    pub incorrect_predictions: Option<i64>,
    pub error_count: Option<Option<i64>>,
    pub accuracy: Option<Option<f64>>,
    pub total_time_ms: Option<i64>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_at(mut self, value: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(value);
        self
    }

    pub fn completed_at(mut self, value: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(value);
        self
    }

    pub fn last_heartbeat(mut self, value: Option<DateTime<Utc>>) -> Self {
        self.last_heartbeat = Some(value);
        self
    }

    pub fn timeout_at(mut self, value: Option<DateTime<Utc>>) -> Self {
        self.timeout_at = Some(value);
        self
    }

    pub fn can_resume(mut self, value: bool) -> Self {
        self.can_resume = Some(value);
        self
    }

    pub fn failure_reason(mut self, value: Option<String>) -> Self {
        self.failure_reason = Some(value);
        self
    }

    pub fn processed_messages(mut self, value: i64) -> Self {
        self.processed_messages = Some(value);
        self
    }

    pub fn total_time_ms(mut self, value: i64) -> Self {
        self.total_time_ms = Some(value);
        self
    }

    /// Sets the scoring columns from final statistics.
    pub fn stats(mut self, stats: &EvaluationStats) -> Self {
        self.correct_predictions = Some(Some(stats.correct));
        self.incorrect_predictions = Some(stats.incorrect);
        self.error_count = Some(Some(stats.errors));
        self.accuracy = Some(Some(stats.accuracy));
        self
    }

    /// Clears the scoring columns.
    pub fn clear_stats(mut self) -> Self {
        self.correct_predictions = Some(None);
        self.incorrect_predictions = Some(0);
        self.error_count = Some(None);
        self.accuracy = Some(None);
        self
    }

    /// Applies this update to an in-memory evaluation.
    pub fn apply_to(&self, evaluation: &mut Evaluation) {
        if let Some(v) = self.started_at {
            evaluation.started_at = v;
        }
        if let Some(v) = self.completed_at {
            evaluation.completed_at = v;
        }
        if let Some(v) = self.last_heartbeat {
            evaluation.last_heartbeat = v;
        }
        if let Some(v) = self.timeout_at {
            evaluation.timeout_at = v;
        }
        if let Some(v) = self.can_resume {
            evaluation.can_resume = v;
        }
        if let Some(ref v) = self.failure_reason {
            evaluation.failure_reason = v.clone();
        }
        if let Some(v) = self.processed_messages {
            evaluation.processed_messages = v;
        }
        if let Some(v) = self.correct_predictions {
            evaluation.correct_predictions = v;
        }
        if let Some(v) = self.incorrect_predictions {
            evaluation.incorrect_predictions = v;
        }
        if let Some(v) = self.error_count {
            evaluation.error_count = v;
        }
        if let Some(v) = self.accuracy {
            evaluation.accuracy = v;
        }
        if let Some(v) = self.total_time_ms {
            evaluation.total_time_ms = v;
        }
    }
}

/// Progress section of a [`StatusReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub processed: i64,
    pub total: i64,
    pub percentage: i64,
}

/// Timing section of a [`StatusReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingReport {
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub total_time_ms: i64,
}

/// Result of `validate_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub id: i64,
    pub display_status: ObservedStatus,
    pub actual_status: EvaluationStatus,
    pub is_stuck: bool,
    pub can_resume: bool,
    pub reason: Option<String>,
    pub progress: ProgressReport,
    pub timing: TimingReport,
}
