//! Bounded-concurrency scheduler pass over an evaluation's messages.
//!
//! A pass keeps at most [`EngineConfig::effective_concurrency`] message tasks
//! in flight on a [`JoinSet`]. Every iteration it first checks whether it
//! should stop (stop signal, status no longer running, timeout), then fills
//! free slots from the queue, waiting out any rate-limit backoff before each
//! dequeue, and finally waits for one task to finish. Halting never aborts
//! in-flight tasks: they are drained before the pass returns.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::progress::{flush_progress, HeartbeatMonitor, ProgressTracker};
use super::registry::StopSignal;
use super::retry::{MessageProcessor, ProcessedMessage};
use super::stats::calculate_stats;
use super::throttle::Throttle;
use super::types::{DatasetMessage, EvaluationStatus, StatusUpdate};
use crate::error::{EvaluationError, StoreError};
use crate::events::{EvaluationEvent, EventBroadcaster};
use crate::llm::LlmProvider;
use crate::metrics::MetricsCollector;
use crate::storage::{Catalog, EvaluationStore};

/// Whether a pass starts over or continues where an earlier one left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    Fresh,
    /// Skips messages that already have a result row.
    Resume,
}

/// How a pass ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Stopped,
}

/// Shared dependencies handed to every pass.
#[derive(Clone)]
pub struct PassContext {
    pub store: Arc<dyn EvaluationStore>,
    pub catalog: Arc<dyn Catalog>,
    pub provider: Arc<dyn LlmProvider>,
    pub events: EventBroadcaster,
    pub throttle: Arc<Throttle>,
    pub config: Arc<EngineConfig>,
    pub metrics: MetricsCollector,
}

impl PassContext {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        catalog: Arc<dyn Catalog>,
        provider: Arc<dyn LlmProvider>,
        events: EventBroadcaster,
        throttle: Arc<Throttle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            provider,
            events,
            throttle,
            config: Arc::new(config),
            metrics: MetricsCollector::new(),
        }
    }
}

enum Halt {
    Stopped,
    TimedOut,
    Failed(EvaluationError),
}

/// Processes the outstanding messages of an evaluation.
///
/// On success the evaluation is marked completed with its final statistics,
/// unless the pass was stopped, in which case the status written by whoever
/// stopped it is left alone. Errors are returned after in-flight work has
/// drained; recording the failure is up to the caller.
pub async fn run_pass(
    ctx: PassContext,
    evaluation_id: i64,
    mode: PassMode,
    stop: StopSignal,
) -> Result<PassOutcome, EvaluationError> {
    let evaluation = ctx
        .store
        .get_evaluation(evaluation_id)
        .await?
        .ok_or_else(|| EvaluationError::evaluation_not_found(evaluation_id))?;
    let prompt = ctx
        .catalog
        .get_prompt(evaluation.prompt_id)
        .await?
        .ok_or_else(|| EvaluationError::NotFound(format!("Prompt {}", evaluation.prompt_id)))?;
    let messages = ctx.catalog.dataset_messages(evaluation.dataset_id).await?;

    let (mut queue, initial_processed, initial_time_ms) = match mode {
        PassMode::Fresh => (messages.iter().cloned().collect::<VecDeque<_>>(), 0, 0),
        PassMode::Resume => {
            let existing = ctx.store.list_results(evaluation_id).await?;
            let done: HashSet<i64> = existing.iter().map(|r| r.dataset_message_id).collect();
            let pending = messages
                .iter()
                .filter(|m| !done.contains(&m.id))
                .cloned()
                .collect::<VecDeque<_>>();
            (pending, existing.len() as i64, evaluation.total_time_ms)
        }
    };

    let capacity = ctx.config.effective_concurrency();
    info!(
        evaluation_id,
        ?mode,
        queued = queue.len(),
        already_processed = initial_processed,
        capacity,
        "Starting evaluation pass"
    );
    ctx.events.publish(
        evaluation_id,
        EvaluationEvent::LlmBatchStart {
            message_count: queue.len(),
            concurrency: capacity,
        },
    );

    let processor = Arc::new(MessageProcessor::new(
        &ctx,
        evaluation_id,
        prompt,
        &evaluation.stop_sequences,
    ));
    let heartbeat = HeartbeatMonitor::start(
        ctx.store.clone(),
        evaluation_id,
        ctx.config.heartbeat_interval,
    );
    let mut progress = ProgressTracker::new(
        initial_processed,
        initial_time_ms,
        ctx.config.progress_batch_size,
    );
    let mut tasks: JoinSet<Result<ProcessedMessage, StoreError>> = JoinSet::new();
    let mut last_flush: Option<JoinHandle<()>> = None;
    let mut halt: Option<Halt> = None;

    ctx.metrics.pass_started();
    loop {
        if halt.is_none() {
            halt = match check_halt(&ctx, evaluation_id, &stop).await {
                Ok(h) => h,
                Err(e) => Some(Halt::Failed(e.into())),
            };
        }

        if halt.is_none() {
            while tasks.len() < capacity && !queue.is_empty() {
                ctx.throttle.consume_backoff().await;
                let Some(message) = queue.pop_front() else {
                    break;
                };
                let processor = processor.clone();
                tasks.spawn(async move { processor.process(&message).await });
            }
        }

        if tasks.is_empty() && (halt.is_some() || queue.is_empty()) {
            break;
        }

        if let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(done)) => {
                    if done.rate_limited {
                        ctx.throttle.escalate();
                    }
                    if progress.record(done.response_time_ms) {
                        last_flush = Some(spawn_flush(
                            last_flush.take(),
                            &ctx,
                            evaluation_id,
                            &progress,
                        ));
                    }
                }
                Ok(Err(e)) => {
                    error!(evaluation_id, error = %e, "Result write failed, halting pass");
                    if !matches!(halt, Some(Halt::Failed(_))) {
                        halt = Some(Halt::Failed(e.into()));
                    }
                }
                Err(e) => {
                    error!(evaluation_id, error = %e, "Message task panicked");
                    if !matches!(halt, Some(Halt::Failed(_))) {
                        halt = Some(Halt::Failed(EvaluationError::Internal(e.to_string())));
                    }
                }
            }
        }

        tokio::task::yield_now().await;
    }

    if let Some(flush) = last_flush.take() {
        let _ = flush.await;
    }
    heartbeat.stop().await;
    ctx.metrics.pass_finished();

    if halt.is_none() && stop.is_signalled() {
        halt = Some(Halt::Stopped);
    }

    if let Err(e) = flush_progress(
        ctx.store.as_ref(),
        &ctx.events,
        evaluation_id,
        progress.processed(),
        progress.total_time_ms(),
    )
    .await
    {
        match halt {
            None => halt = Some(Halt::Failed(e.into())),
            Some(_) => warn!(evaluation_id, error = %e, "Final progress flush failed"),
        }
    }

    match halt {
        None => {
            complete(&ctx, evaluation_id, &messages, &progress).await?;
            Ok(PassOutcome::Completed)
        }
        Some(Halt::Stopped) => {
            info!(
                evaluation_id,
                processed = progress.processed(),
                "Evaluation pass stopped"
            );
            Ok(PassOutcome::Stopped)
        }
        Some(Halt::TimedOut) => {
            warn!(evaluation_id, "Evaluation exceeded timeout limit");
            Err(EvaluationError::TimeoutExceeded)
        }
        Some(Halt::Failed(e)) => Err(e),
    }
}

async fn check_halt(
    ctx: &PassContext,
    evaluation_id: i64,
    stop: &StopSignal,
) -> Result<Option<Halt>, StoreError> {
    if stop.is_signalled() {
        return Ok(Some(Halt::Stopped));
    }

    let Some(current) = ctx.store.get_evaluation(evaluation_id).await? else {
        debug!(evaluation_id, "Evaluation disappeared, stopping pass");
        return Ok(Some(Halt::Stopped));
    };
    if current.status != EvaluationStatus::Running {
        debug!(evaluation_id, status = %current.status, "Evaluation no longer running");
        return Ok(Some(Halt::Stopped));
    }
    if current.timeout_at.is_some_and(|at| Utc::now() > at) {
        return Ok(Some(Halt::TimedOut));
    }
    Ok(None)
}

/// Spawns `work` to run once `previous` has finished.
fn spawn_after<F>(previous: Option<JoinHandle<()>>, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        work.await;
    })
}

/// Flushes the current counters in the background, after the previous flush,
/// so stored progress never moves backwards.
fn spawn_flush(
    previous: Option<JoinHandle<()>>,
    ctx: &PassContext,
    evaluation_id: i64,
    progress: &ProgressTracker,
) -> JoinHandle<()> {
    let store = ctx.store.clone();
    let events = ctx.events.clone();
    let processed = progress.processed();
    let total_time_ms = progress.total_time_ms();
    spawn_after(previous, async move {
        if let Err(e) =
            flush_progress(store.as_ref(), &events, evaluation_id, processed, total_time_ms).await
        {
            warn!(evaluation_id, error = %e, "Progress flush failed");
        }
    })
}

async fn complete(
    ctx: &PassContext,
    evaluation_id: i64,
    messages: &[DatasetMessage],
    progress: &ProgressTracker,
) -> Result<(), EvaluationError> {
    let results = ctx.store.list_results(evaluation_id).await?;
    let stats = calculate_stats(&results, messages);

    let update = StatusUpdate::new()
        .completed_at(Some(Utc::now()))
        .can_resume(false)
        .failure_reason(None)
        .processed_messages(progress.processed())
        .total_time_ms(progress.total_time_ms())
        .stats(&stats);
    let evaluation = ctx
        .store
        .update_status(evaluation_id, EvaluationStatus::Completed, update)
        .await?;

    ctx.metrics.record_transition(EvaluationStatus::Completed.as_str());
    ctx.events.complete(&evaluation);
    info!(
        evaluation_id,
        total = stats.total,
        correct = stats.correct,
        incorrect = stats.incorrect,
        errors = stats.errors,
        accuracy = stats.accuracy,
        "Evaluation completed"
    );
    Ok(())
}

/// Marks a run failed after its pass returned an error.
///
/// The run stays resumable; subscribers get an `error` event followed by
/// the final snapshot.
pub async fn fail_run(ctx: &PassContext, evaluation_id: i64, err: &EvaluationError) {
    let message = err.to_string();
    error!(evaluation_id, error = %message, "Evaluation pass failed");

    let update = StatusUpdate::new()
        .can_resume(true)
        .completed_at(Some(Utc::now()))
        .failure_reason(Some(message.clone()));
    ctx.events
        .publish(evaluation_id, EvaluationEvent::Error { message });

    match ctx
        .store
        .update_status(evaluation_id, EvaluationStatus::Failed, update)
        .await
    {
        Ok(evaluation) => {
            ctx.metrics.record_transition(EvaluationStatus::Failed.as_str());
            ctx.events.complete(&evaluation);
        }
        Err(e) => error!(evaluation_id, error = %e, "Could not record evaluation failure"),
    }
}
