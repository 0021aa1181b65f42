//! Progress counters and liveness for a running pass.
//!
//! [`ProgressTracker`] accumulates completions and says when a batch is due
//! for persistence; [`flush_progress`] writes the counters plus a heartbeat
//! and broadcasts a fresh snapshot. [`HeartbeatMonitor`] keeps the heartbeat
//! fresh in the background while model calls are slow to return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::events::EventBroadcaster;
use crate::storage::EvaluationStore;

/// Processed-message and response-time counters for one pass.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    processed: i64,
    total_time_ms: i64,
    since_flush: usize,
    batch_size: usize,
}

impl ProgressTracker {
    /// Starts from counters already persisted for the evaluation.
    pub fn new(processed: i64, total_time_ms: i64, batch_size: usize) -> Self {
        Self {
            processed,
            total_time_ms,
            since_flush: 0,
            batch_size: batch_size.max(1),
        }
    }

    /// Counts one finished message. Returns true when a batch flush is due.
    pub fn record(&mut self, response_time_ms: u64) -> bool {
        self.processed += 1;
        self.total_time_ms += response_time_ms as i64;
        self.since_flush += 1;
        if self.since_flush >= self.batch_size {
            self.since_flush = 0;
            true
        } else {
            false
        }
    }

    pub fn processed(&self) -> i64 {
        self.processed
    }

    pub fn total_time_ms(&self) -> i64 {
        self.total_time_ms
    }
}

/// Persists progress, refreshes the heartbeat and broadcasts a snapshot.
pub async fn flush_progress(
    store: &dyn EvaluationStore,
    events: &EventBroadcaster,
    evaluation_id: i64,
    processed: i64,
    total_time_ms: i64,
) -> Result<(), StoreError> {
    store
        .update_progress(evaluation_id, processed, total_time_ms)
        .await?;
    store.touch_heartbeat(evaluation_id, Utc::now()).await?;

    if let Some(evaluation) = store.get_evaluation(evaluation_id).await? {
        events.publish_snapshot(&evaluation);
    }

    tracing::debug!(evaluation_id, processed, total_time_ms, "Progress flushed");
    Ok(())
}

/// Background task touching an evaluation's heartbeat on a fixed interval.
///
/// Call [`HeartbeatMonitor::stop`] when the pass ends; dropping the monitor
/// also cancels it.
pub struct HeartbeatMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn start(store: Arc<dyn EvaluationStore>, evaluation_id: i64, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                if let Err(e) = store.touch_heartbeat(evaluation_id, Utc::now()).await {
                    tracing::warn!(evaluation_id, error = %e, "Heartbeat update failed");
                }
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stops the monitor without waiting for the next tick.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
