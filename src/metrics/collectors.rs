//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library users
//! and tests that never initialize metrics pay nothing.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_PASSES, EVALUATION_TRANSITIONS, EVENT_SUBSCRIBERS, IN_FLIGHT_REQUESTS, LLM_LATENCY,
    LLM_REQUESTS_TOTAL, LLM_RETRIES_TOTAL, MESSAGES_TOTAL, RATE_LIMIT_BACKOFF_MS,
};

/// Outcome of one model call, as recorded in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Failure,
    RateLimited,
}

impl CallStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Failure => "failure",
            CallStatus::RateLimited => "rate_limited",
        }
    }
}

/// Final outcome of one dataset message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Labelled,
    Unlabelled,
    Error,
}

impl MessageOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Labelled => "labelled",
            MessageOutcome::Unlabelled => "unlabelled",
            MessageOutcome::Error => "error",
        }
    }
}

/// Metrics collector for engine operations.
///
/// ```ignore
/// use prompt_eval::metrics::{init_metrics, CallStatus, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_llm_call("gpt-4o-mini", CallStatus::Success, Duration::from_millis(840));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record one model call and its latency.
    pub fn record_llm_call(&self, model: &str, status: CallStatus, latency: Duration) {
        if let Some(requests) = LLM_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[model, status.as_str()]).inc();
        }

        if status == CallStatus::Success {
            if let Some(latency_hist) = LLM_LATENCY.get() {
                latency_hist
                    .with_label_values(&[model])
                    .observe(latency.as_secs_f64());
            }
        }

        tracing::trace!(
            model = model,
            status = status.as_str(),
            latency_ms = latency.as_millis() as u64,
            "Recorded LLM call metric"
        );
    }

    /// Record an attempt beyond the first for a message.
    pub fn record_retry(&self) {
        if let Some(retries) = LLM_RETRIES_TOTAL.get() {
            retries.inc();
        }
    }

    /// Record the final outcome of a message.
    pub fn record_message(&self, outcome: MessageOutcome) {
        if let Some(messages) = MESSAGES_TOTAL.get() {
            messages.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    /// Record an evaluation entering `status`.
    pub fn record_transition(&self, status: &str) {
        if let Some(transitions) = EVALUATION_TRANSITIONS.get() {
            transitions.with_label_values(&[status]).inc();
        }
        tracing::trace!(status = status, "Recorded evaluation transition");
    }

    /// Adjust the in-flight call gauge.
    pub fn call_started(&self) {
        if let Some(gauge) = IN_FLIGHT_REQUESTS.get() {
            gauge.inc();
        }
    }

    pub fn call_finished(&self) {
        if let Some(gauge) = IN_FLIGHT_REQUESTS.get() {
            gauge.dec();
        }
    }

    /// Adjust the active pass gauge.
    pub fn pass_started(&self) {
        if let Some(gauge) = ACTIVE_PASSES.get() {
            gauge.inc();
        }
    }

    pub fn pass_finished(&self) {
        if let Some(gauge) = ACTIVE_PASSES.get() {
            gauge.dec();
        }
    }

    /// Publish the current rate-limit backoff delay.
    pub fn set_backoff(&self, backoff: Duration) {
        if let Some(gauge) = RATE_LIMIT_BACKOFF_MS.get() {
            gauge.set(backoff.as_millis() as f64);
        }
    }

    /// Publish the number of open event subscriptions.
    pub fn set_subscribers(&self, count: usize) {
        if let Some(gauge) = EVENT_SUBSCRIBERS.get() {
            gauge.set(count as f64);
        }
    }
}
