//! Event payloads published for an evaluation.

use serde::{Deserialize, Serialize};

use crate::evaluation::Evaluation;

/// An event observed on an evaluation's live stream.
///
/// Serialized as a JSON object with a `type` discriminator, e.g.
/// `{"type":"llm_call_complete","messageId":12,"success":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationEvent {
    /// Snapshot after a status or progress change.
    Evaluation { data: Evaluation },
    /// Final snapshot; the stream closes after it.
    Complete { data: Evaluation },
    LlmCallStart {
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    LlmCallComplete {
        #[serde(rename = "messageId")]
        message_id: i64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A scheduler pass started.
    LlmBatchStart {
        #[serde(rename = "messageCount")]
        message_count: usize,
        concurrency: usize,
    },
    Error { message: String },
}

impl EvaluationEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationEvent::Evaluation { .. } => "evaluation",
            EvaluationEvent::Complete { .. } => "complete",
            EvaluationEvent::LlmCallStart { .. } => "llm_call_start",
            EvaluationEvent::LlmCallComplete { .. } => "llm_call_complete",
            EvaluationEvent::LlmBatchStart { .. } => "llm_batch_start",
            EvaluationEvent::Error { .. } => "error",
        }
    }

    /// Renders the event as one server-sent-events frame.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
