//! Metrics module for Prometheus-based monitoring.
//!
//! Records model call volume and latency, per-message outcomes, evaluation
//! status transitions, in-flight calls, rate-limit backoff, and event
//! subscriptions.
//!
//! # Example
//!
//! ```ignore
//! use prompt_eval::metrics::{export_metrics, init_metrics, MessageOutcome, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_message(MessageOutcome::Labelled);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{CallStatus, MessageOutcome, MetricsCollector};
pub use self::prometheus::{export_metrics, init_metrics};
