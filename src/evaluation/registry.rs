//! Registry of scheduler passes running in this process.
//!
//! Every launched pass is recorded under its evaluation id together with a
//! stop signal and a shareable completion future, so callers can signal a
//! pass, wait for it, or chain a new pass behind it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

/// Final outcome of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    /// Left before finishing because of a stop, reset or status change.
    Stopped,
    Failed(String),
}

/// Cooperative stop flag checked by a pass once per scheduling iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type RunFuture = Shared<BoxFuture<'static, RunOutcome>>;

struct RunEntry {
    stop: StopSignal,
    finished: Arc<AtomicBool>,
    done: RunFuture,
}

impl RunEntry {
    fn is_active(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }
}

/// Passes keyed by evaluation id. Only the latest pass per evaluation is kept.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<i64, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<i64, RunEntry>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawns the pass built by `pass` with a fresh stop signal.
    ///
    /// The pass starts only after the previous pass for the same evaluation
    /// has finished.
    pub fn launch<F, Fut>(&self, evaluation_id: i64, pass: F)
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = RunOutcome> + Send + 'static,
    {
        let stop = StopSignal::new();
        let finished = Arc::new(AtomicBool::new(false));
        let work = pass(stop.clone());

        let mut runs = self.runs();
        let previous = runs.get(&evaluation_id).map(|entry| entry.done.clone());
        let flag = finished.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let outcome = work.await;
            flag.store(true, Ordering::SeqCst);
            outcome
        });

        let done = async move {
            handle
                .await
                .unwrap_or_else(|e| RunOutcome::Failed(format!("Evaluation task aborted: {}", e)))
        }
        .boxed()
        .shared();

        runs.insert(
            evaluation_id,
            RunEntry {
                stop,
                finished,
                done,
            },
        );
        tracing::debug!(evaluation_id, "Evaluation pass registered");
    }

    /// Asks the current pass of an evaluation to stop. Returns false when
    /// no pass is registered.
    pub fn signal_stop(&self, evaluation_id: i64) -> bool {
        match self.runs().get(&evaluation_id) {
            Some(entry) => {
                entry.stop.signal();
                true
            }
            None => false,
        }
    }

    /// Whether a registered pass has not finished yet.
    pub fn is_active(&self, evaluation_id: i64) -> bool {
        self.runs()
            .get(&evaluation_id)
            .map(RunEntry::is_active)
            .unwrap_or(false)
    }

    /// Waits for the latest pass of an evaluation.
    ///
    /// Returns `None` when no pass was ever launched here.
    pub async fn wait(&self, evaluation_id: i64) -> Option<RunOutcome> {
        let done = self.runs().get(&evaluation_id).map(|e| e.done.clone())?;
        Some(done.await)
    }

    /// Signals the pass and waits for it to drain.
    pub async fn stop_and_wait(&self, evaluation_id: i64) -> Option<RunOutcome> {
        self.signal_stop(evaluation_id);
        self.wait(evaluation_id).await
    }

    /// Drops the record of an evaluation's pass.
    pub fn forget(&self, evaluation_id: i64) {
        self.runs().remove(&evaluation_id);
    }

    pub fn active_count(&self) -> usize {
        self.runs()
            .values()
            .filter(|entry| entry.is_active())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_wait_returns_outcome() {
        let registry = RunRegistry::new();
        registry.launch(1, |_stop| async { RunOutcome::Completed });

        assert_eq!(registry.wait(1).await, Some(RunOutcome::Completed));
        assert_eq!(registry.wait(1).await, Some(RunOutcome::Completed));
        assert_eq!(registry.wait(2).await, None);
        assert!(!registry.is_active(1));
    }

    #[tokio::test]
    async fn test_stop_signal_reaches_pass() {
        let registry = RunRegistry::new();
        registry.launch(1, |stop| async move {
            while !stop.is_signalled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            RunOutcome::Stopped
        });

        assert!(registry.is_active(1));
        assert_eq!(registry.stop_and_wait(1).await, Some(RunOutcome::Stopped));
        assert!(!registry.signal_stop(7));
    }

    #[tokio::test]
    async fn test_new_pass_waits_for_previous() {
        let registry = RunRegistry::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        let first = order_tx.clone();
        registry.launch(1, move |_stop| async move {
            let _ = release_rx.await;
            let _ = first.send("first");
            RunOutcome::Stopped
        });
        registry.launch(1, move |_stop| async move {
            let _ = order_tx.send("second");
            RunOutcome::Completed
        });

        tokio::task::yield_now().await;
        assert!(order_rx.try_recv().is_err());

        let _ = release_tx.send(());
        assert_eq!(registry.wait(1).await, Some(RunOutcome::Completed));
        assert_eq!(order_rx.recv().await, Some("first"));
        assert_eq!(order_rx.recv().await, Some("second"));
    }
}
