//! Evaluation lifecycle: creation, state transitions and status diagnosis.
//!
//! [`EvaluationService`] validates every transition against the stored
//! record, writes the new state, and hands pass execution to the
//! [`RunRegistry`]. Operations that launch a pass return as soon as the
//! evaluation is marked running; [`EvaluationService::wait_for_run`] exposes
//! the pass outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::config::{ConfigError, EngineConfig};
use super::registry::{RunOutcome, RunRegistry};
use super::scheduler::{fail_run, run_pass, PassContext, PassMode, PassOutcome};
use super::throttle::Throttle;
use super::types::{
    Evaluation, EvaluationResult, EvaluationStatus, NewEvaluation, NewEvaluationRequest,
    ObservedStatus, ProgressReport, ResultFilter, StatusReport, StatusUpdate, TimingReport,
};
use crate::error::EvaluationError;
use crate::events::{EventBroadcaster, Subscription};
use crate::llm::LlmProvider;
use crate::metrics::MetricsCollector;
use crate::storage::{Catalog, EvaluationStore, SerializedStore};

const MANUALLY_PAUSED: &str = "Manually paused";
const RESTART_REASON: &str = "Evaluation was interrupted by a server restart";

/// Entry point for evaluation lifecycle operations.
pub struct EvaluationService {
    ctx: PassContext,
    registry: RunRegistry,
    started_at: DateTime<Utc>,
}

impl EvaluationService {
    /// Builds a service over `store`, serializing its writes.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` when `config` does not validate.
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        catalog: Arc<dyn Catalog>,
        provider: Arc<dyn LlmProvider>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        let throttle = Arc::new(Throttle::from_config(&config));
        Self::with_throttle(store, catalog, provider, config, throttle)
    }

    /// Like [`EvaluationService::new`] with an externally owned throttle.
    pub fn with_throttle(
        store: Arc<dyn EvaluationStore>,
        catalog: Arc<dyn Catalog>,
        provider: Arc<dyn LlmProvider>,
        config: EngineConfig,
        throttle: Arc<Throttle>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let store: Arc<dyn EvaluationStore> = Arc::new(SerializedStore::new(store));
        let events = EventBroadcaster::new(config.event_buffer);
        Ok(Self {
            ctx: PassContext::new(store, catalog, provider, events, throttle, config),
            registry: RunRegistry::new(),
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.ctx.events
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.ctx.throttle
    }

    /// When this service instance was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn metrics(&self) -> MetricsCollector {
        self.ctx.metrics
    }

    /// Loads an evaluation and checks that `actor` owns it.
    async fn load_owned(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self
            .ctx
            .store
            .get_evaluation(id)
            .await?
            .ok_or_else(|| EvaluationError::evaluation_not_found(id))?;

        if evaluation.created_by != actor {
            return Err(EvaluationError::PermissionDenied(format!(
                "evaluation {} belongs to another user",
                id
            )));
        }
        Ok(evaluation)
    }

    fn timeout_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, EvaluationError> {
        let horizon = chrono::Duration::from_std(self.ctx.config.evaluation_timeout)
            .map_err(|e| EvaluationError::Internal(format!("invalid evaluation timeout: {}", e)))?;
        Ok(now + horizon)
    }

    async fn write_status(
        &self,
        id: i64,
        status: EvaluationStatus,
        update: StatusUpdate,
    ) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.ctx.store.update_status(id, status, update).await?;
        self.metrics().record_transition(status.as_str());
        self.ctx.events.publish_snapshot(&evaluation);
        Ok(evaluation)
    }

    /// Creates a pending evaluation of a prompt over a dataset.
    pub async fn create_evaluation(
        &self,
        request: NewEvaluationRequest,
        actor: &str,
    ) -> Result<Evaluation, EvaluationError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(EvaluationError::Validation(
                "evaluation name is required".to_string(),
            ));
        }

        let prompt = self
            .ctx
            .catalog
            .get_prompt(request.prompt_id)
            .await?
            .ok_or_else(|| EvaluationError::NotFound(format!("Prompt {}", request.prompt_id)))?;
        if !self.ctx.catalog.dataset_exists(request.dataset_id).await? {
            return Err(EvaluationError::NotFound(format!(
                "Dataset {}",
                request.dataset_id
            )));
        }
        let total_messages = self
            .ctx
            .catalog
            .dataset_messages(request.dataset_id)
            .await?
            .len() as i64;

        let evaluation = self
            .ctx
            .store
            .create_evaluation(NewEvaluation {
                name: name.to_string(),
                description: request.description,
                prompt_id: prompt.id,
                dataset_id: request.dataset_id,
                stop_sequences: prompt.stop_sequences,
                total_messages,
                created_by: actor.to_string(),
            })
            .await?;

        self.metrics()
            .record_transition(EvaluationStatus::Pending.as_str());
        info!(
            evaluation_id = evaluation.id,
            prompt_id = evaluation.prompt_id,
            dataset_id = evaluation.dataset_id,
            total_messages,
            "Evaluation created"
        );
        Ok(evaluation)
    }

    /// Fetches an evaluation owned by `actor`.
    pub async fn get(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        self.load_owned(id, actor).await
    }

    /// All stored results of an evaluation, ordered by message id.
    pub async fn results(
        &self,
        id: i64,
        actor: &str,
    ) -> Result<Vec<EvaluationResult>, EvaluationError> {
        self.load_owned(id, actor).await?;
        Ok(self.ctx.store.list_results(id).await?)
    }

    /// Starts a pending evaluation.
    pub async fn start(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if evaluation.status != EvaluationStatus::Pending {
            return Err(EvaluationError::InvalidState(format!(
                "Cannot start evaluation in {} state",
                evaluation.status
            )));
        }
        self.begin_run(&evaluation, PassMode::Fresh, false).await
    }

    /// Continues a paused or failed evaluation from its stored results.
    pub async fn resume(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if !evaluation.can_resume {
            return Err(EvaluationError::InvalidState(
                "Evaluation cannot be resumed".to_string(),
            ));
        }
        if evaluation.status == EvaluationStatus::Running {
            return Err(EvaluationError::InvalidState(
                "Evaluation is already running".to_string(),
            ));
        }
        self.begin_run(&evaluation, PassMode::Resume, false).await
    }

    /// Pauses a running evaluation. In-flight calls finish in the background.
    pub async fn stop(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if evaluation.status != EvaluationStatus::Running {
            return Err(EvaluationError::InvalidState(
                "Evaluation is not running".to_string(),
            ));
        }

        let update = StatusUpdate::new()
            .can_resume(true)
            .failure_reason(Some(MANUALLY_PAUSED.to_string()));
        let paused = self
            .write_status(id, EvaluationStatus::Paused, update)
            .await?;
        self.registry.signal_stop(id);

        info!(evaluation_id = id, "Evaluation paused");
        Ok(paused)
    }

    /// Returns a failed or running evaluation to its pending state and
    /// discards all of its results.
    pub async fn reset(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if !matches!(
            evaluation.status,
            EvaluationStatus::Failed | EvaluationStatus::Running
        ) {
            return Err(EvaluationError::InvalidState(format!(
                "Cannot reset evaluation in {} state",
                evaluation.status
            )));
        }

        self.registry.stop_and_wait(id).await;
        let removed = self.ctx.store.delete_results(id, ResultFilter::All).await?;

        let update = StatusUpdate::new()
            .started_at(None)
            .completed_at(None)
            .last_heartbeat(None)
            .timeout_at(None)
            .can_resume(false)
            .failure_reason(None)
            .processed_messages(0)
            .total_time_ms(0)
            .clear_stats();
        let reset = self
            .write_status(id, EvaluationStatus::Pending, update)
            .await?;

        info!(evaluation_id = id, removed, "Evaluation reset");
        Ok(reset)
    }

    /// Deletes the error rows of a finished evaluation and reprocesses
    /// those messages.
    pub async fn retry_errors(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if !matches!(
            evaluation.status,
            EvaluationStatus::Completed | EvaluationStatus::Failed
        ) {
            return Err(EvaluationError::InvalidState(format!(
                "Cannot retry errors of evaluation in {} state",
                evaluation.status
            )));
        }
        let errors = self
            .ctx
            .store
            .count_results(id, ResultFilter::ErrorsOnly)
            .await?;
        if errors == 0 {
            return Err(EvaluationError::InvalidState(
                "Evaluation has no errors to retry".to_string(),
            ));
        }

        self.registry.wait(id).await;
        let removed = self
            .ctx
            .store
            .delete_results(id, ResultFilter::ErrorsOnly)
            .await?;

        let now = Utc::now();
        let processed = (evaluation.processed_messages - removed as i64).max(0);
        let update = StatusUpdate::new()
            .processed_messages(processed)
            .clear_stats()
            .completed_at(None)
            .last_heartbeat(Some(now))
            .timeout_at(Some(self.timeout_from(now)?))
            .failure_reason(None)
            .can_resume(true);
        let running = self
            .write_status(id, EvaluationStatus::Running, update)
            .await?;

        info!(evaluation_id = id, removed, "Retrying failed messages");
        self.launch(id, PassMode::Resume);
        Ok(running)
    }

    /// Creates and starts a copy of a completed evaluation.
    pub async fn rerun(&self, id: i64, actor: &str) -> Result<Evaluation, EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if evaluation.status != EvaluationStatus::Completed {
            return Err(EvaluationError::InvalidState(
                "Only completed evaluations can be rerun".to_string(),
            ));
        }

        let copy = self
            .create_evaluation(
                NewEvaluationRequest {
                    name: format!("{} (Rerun)", evaluation.name),
                    description: evaluation.description.clone(),
                    prompt_id: evaluation.prompt_id,
                    dataset_id: evaluation.dataset_id,
                },
                actor,
            )
            .await?;
        info!(evaluation_id = id, rerun_id = copy.id, "Evaluation rerun created");
        self.start(copy.id, actor).await
    }

    /// Diagnoses a running evaluation that may have been abandoned.
    ///
    /// A running evaluation is reported `stuck` when it was started before
    /// this service and has no pass here, or when its heartbeat is stale, and
    /// `timeout` when its deadline has passed. Either diagnosis marks it
    /// resumable.
    pub async fn validate_status(&self, id: i64, actor: &str) -> Result<StatusReport, EvaluationError> {
        let mut evaluation = self.load_owned(id, actor).await?;
        let now = Utc::now();
        let actual_status = evaluation.status;
        let mut display_status = ObservedStatus::from(actual_status);
        let mut is_stuck = false;
        let mut reason = evaluation.failure_reason.clone();

        if actual_status == EvaluationStatus::Running {
            if let Some((observed, why)) = self.diagnose(&evaluation, now) {
                warn!(evaluation_id = id, reason = %why, "Running evaluation looks abandoned");
                let update = StatusUpdate::new()
                    .can_resume(true)
                    .failure_reason(Some(why.clone()))
                    .last_heartbeat(Some(now));
                evaluation = self
                    .ctx
                    .store
                    .update_status(id, EvaluationStatus::Running, update)
                    .await?;
                display_status = observed;
                is_stuck = true;
                reason = Some(why);
            }
        }

        Ok(StatusReport {
            id,
            display_status,
            actual_status,
            is_stuck,
            can_resume: evaluation.can_resume,
            reason,
            progress: ProgressReport {
                processed: evaluation.processed_messages,
                total: evaluation.total_messages,
                percentage: evaluation.progress_percentage(),
            },
            timing: TimingReport {
                started_at: evaluation.started_at,
                last_heartbeat: evaluation.last_heartbeat,
                timeout_at: evaluation.timeout_at,
                total_time_ms: evaluation.total_time_ms,
            },
        })
    }

    fn diagnose(&self, evaluation: &Evaluation, now: DateTime<Utc>) -> Option<(ObservedStatus, String)> {
        let orphaned = evaluation
            .started_at
            .is_some_and(|started| started < self.started_at)
            && !self.registry.is_active(evaluation.id);
        if orphaned {
            return Some((ObservedStatus::Stuck, RESTART_REASON.to_string()));
        }

        let stale_after = self.ctx.config.stale_heartbeat;
        let stale = evaluation.last_heartbeat.is_some_and(|beat| {
            (now - beat).to_std().map(|age| age > stale_after).unwrap_or(false)
        });
        if stale {
            return Some((
                ObservedStatus::Stuck,
                format!(
                    "No heartbeat for more than {} minutes",
                    (stale_after.as_secs() / 60).max(1)
                ),
            ));
        }

        if evaluation.timeout_at.is_some_and(|at| now > at) {
            return Some((
                ObservedStatus::Timeout,
                EvaluationError::TimeoutExceeded.to_string(),
            ));
        }
        None
    }

    /// Deletes an evaluation that is not running, with all of its results.
    pub async fn delete(&self, id: i64, actor: &str) -> Result<(), EvaluationError> {
        let evaluation = self.load_owned(id, actor).await?;
        if evaluation.status == EvaluationStatus::Running {
            return Err(EvaluationError::InvalidState(
                "Cannot delete a running evaluation".to_string(),
            ));
        }

        self.registry.stop_and_wait(id).await;
        self.ctx.store.delete_evaluation(id).await?;
        self.registry.forget(id);

        info!(evaluation_id = id, "Evaluation deleted");
        Ok(())
    }

    /// Live event stream of an evaluation.
    pub fn subscribe(&self, id: i64) -> Subscription {
        self.ctx.events.subscribe(id)
    }

    /// Waits for the latest pass launched for `id` in this process.
    pub async fn wait_for_run(&self, id: i64) -> Option<RunOutcome> {
        self.registry.wait(id).await
    }

    /// Number of passes still running in this process.
    pub fn active_runs(&self) -> usize {
        self.registry.active_count()
    }

    async fn begin_run(
        &self,
        evaluation: &Evaluation,
        mode: PassMode,
        can_resume: bool,
    ) -> Result<Evaluation, EvaluationError> {
        let id = evaluation.id;
        let now = Utc::now();

        let mut update = StatusUpdate::new()
            .last_heartbeat(Some(now))
            .timeout_at(Some(self.timeout_from(now)?))
            .completed_at(None)
            .failure_reason(None)
            .can_resume(can_resume);
        if mode == PassMode::Fresh || evaluation.started_at.is_none() {
            update = update.started_at(Some(now));
        }

        let running = self
            .write_status(id, EvaluationStatus::Running, update)
            .await?;
        info!(evaluation_id = id, ?mode, "Evaluation started");
        self.launch(id, mode);
        Ok(running)
    }

    fn launch(&self, evaluation_id: i64, mode: PassMode) {
        let ctx = self.ctx.clone();
        self.registry.launch(evaluation_id, move |stop| async move {
            match run_pass(ctx.clone(), evaluation_id, mode, stop).await {
                Ok(PassOutcome::Completed) => RunOutcome::Completed,
                Ok(PassOutcome::Stopped) => RunOutcome::Stopped,
                Err(err) => {
                    fail_run(&ctx, evaluation_id, &err).await;
                    RunOutcome::Failed(err.to_string())
                }
            }
        });
    }
}
