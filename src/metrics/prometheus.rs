//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by prompt-eval and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all prompt-eval metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Evaluation status transitions, labeled by the status entered.
pub static EVALUATION_TRANSITIONS: OnceLock<CounterVec> = OnceLock::new();

/// Scheduler passes currently alive.
pub static ACTIVE_PASSES: OnceLock<Gauge> = OnceLock::new();

/// Per-message outcomes, labeled by outcome (labelled, unlabelled, error).
pub static MESSAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Attempts beyond the first one for a message.
pub static LLM_RETRIES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Model calls currently in flight across all passes.
pub static IN_FLIGHT_REQUESTS: OnceLock<Gauge> = OnceLock::new();

/// Current rate-limit backoff delay in milliseconds.
pub static RATE_LIMIT_BACKOFF_MS: OnceLock<Gauge> = OnceLock::new();

/// Open event subscriptions.
pub static EVENT_SUBSCRIBERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// globals from the first call in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Lifecycle metrics
    let evaluation_transitions = CounterVec::new(
        Opts::new(
            "prompt_eval_evaluation_transitions_total",
            "Evaluation status transitions",
        ),
        &["status"],
    )?;

    let active_passes = Gauge::new(
        "prompt_eval_active_passes",
        "Scheduler passes currently running",
    )?;

    let messages_total = CounterVec::new(
        Opts::new("prompt_eval_messages_total", "Processed dataset messages"),
        &["outcome"],
    )?;

    // LLM metrics
    let llm_requests_total = CounterVec::new(
        Opts::new("prompt_eval_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "prompt_eval_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
        &["model"],
    )?;

    let llm_retries_total = Counter::new(
        "prompt_eval_llm_retries_total",
        "Model call attempts beyond the first for a message",
    )?;

    let in_flight_requests = Gauge::new(
        "prompt_eval_llm_in_flight",
        "Model calls currently in flight",
    )?;

    let rate_limit_backoff_ms = Gauge::new(
        "prompt_eval_rate_limit_backoff_ms",
        "Current rate-limit backoff delay in milliseconds",
    )?;

    let event_subscribers = Gauge::new(
        "prompt_eval_event_subscribers",
        "Open evaluation event subscriptions",
    )?;

    registry.register(Box::new(evaluation_transitions.clone()))?;
    registry.register(Box::new(active_passes.clone()))?;
    registry.register(Box::new(messages_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_retries_total.clone()))?;
    registry.register(Box::new(in_flight_requests.clone()))?;
    registry.register(Box::new(rate_limit_backoff_ms.clone()))?;
    registry.register(Box::new(event_subscribers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = EVALUATION_TRANSITIONS.set(evaluation_transitions);
    let _ = ACTIVE_PASSES.set(active_passes);
    let _ = MESSAGES_TOTAL.set(messages_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_RETRIES_TOTAL.set(llm_retries_total);
    let _ = IN_FLIGHT_REQUESTS.set(in_flight_requests);
    let _ = RATE_LIMIT_BACKOFF_MS.set(rate_limit_backoff_ms);
    let _ = EVENT_SUBSCRIBERS.set(event_subscribers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
