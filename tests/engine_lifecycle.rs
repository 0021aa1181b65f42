//! End-to-end tests of the evaluation lifecycle against in-process stores
//! and a scripted model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use prompt_eval::evaluation::{
    ConfigError, EngineConfig, EvaluationService, EvaluationStatus, NewEvaluationRequest,
    ObservedStatus, RunOutcome, StatusUpdate,
};
use prompt_eval::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use prompt_eval::storage::{EvaluationStore, MemoryStore, NewPrompt, SqliteStore};
use prompt_eval::{ErrorKind, EvaluationEvent, LlmError};

const OWNER: &str = "alice";
const PROMPT_PREFIX: &str = "Classify: ";

/// Answers `true` for messages starting with "spam", `false` otherwise.
///
/// Messages starting with "fail" always error, messages starting with
/// "flaky" error while `flaky` is set. Messages starting with "limited" are
/// always rate limited, messages starting with "burst" only on their first
/// call.
#[derive(Default)]
struct LabelModel {
    delay: Duration,
    flaky: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<HashMap<String, usize>>,
}

impl LabelModel {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls_for(&self, message: &str) -> usize {
        self.calls.lock().unwrap().get(message).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for LabelModel {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let message = request.messages[0]
            .content
            .trim_start_matches(PROMPT_PREFIX)
            .to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(message.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if message.starts_with("limited") || (message.starts_with("burst") && call == 1) {
            return Err(LlmError::RateLimited("too many requests".to_string()));
        }
        if message.starts_with("fail")
            || (message.starts_with("flaky") && self.flaky.load(Ordering::SeqCst))
        {
            return Err(LlmError::ApiError {
                code: 500,
                message: "upstream exploded".to_string(),
            });
        }

        let verdict = message.starts_with("spam");
        Ok(GenerationResponse {
            id: "resp".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(format!("<r>{}</r>", verdict)),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry_attempts(2)
        .with_retry_delay(Duration::from_millis(1))
        .with_error_cooldown(Duration::from_millis(1))
        .with_backoff(
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_millis(1),
        )
        .with_heartbeat_interval(Duration::from_millis(20))
}

fn messages(items: &[(&str, bool)]) -> Vec<(String, bool)> {
    items
        .iter()
        .map(|(content, label)| (content.to_string(), *label))
        .collect()
}

fn numbered(prefix: &str, count: usize, label: bool) -> Vec<(String, bool)> {
    (0..count)
        .map(|i| (format!("{}-{}", prefix, i), label))
        .collect()
}

struct Harness {
    store: Arc<MemoryStore>,
    model: Arc<LabelModel>,
    service: EvaluationService,
    evaluation_id: i64,
}

impl Harness {
    async fn new(dataset: Vec<(String, bool)>, model: LabelModel, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let prompt = store.insert_prompt(NewPrompt::new(
            "spam",
            "test-model",
            "Classify: {{messageContent}}",
            "<r>",
            "</r>",
        ));
        let dataset_id = store.insert_dataset("inbox", &dataset);
        let model = Arc::new(model);
        let service = EvaluationService::new(store.clone(), store.clone(), model.clone(), config)
            .expect("config should validate");

        let evaluation = service
            .create_evaluation(
                NewEvaluationRequest {
                    name: "spam check".to_string(),
                    description: None,
                    prompt_id: prompt.id,
                    dataset_id,
                },
                OWNER,
            )
            .await
            .expect("evaluation should be created");

        Self {
            store,
            model,
            service,
            evaluation_id: evaluation.id,
        }
    }

    async fn run_to_end(&self) -> RunOutcome {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.service.wait_for_run(self.evaluation_id),
        )
        .await
        .expect("pass should finish")
        .expect("a pass should have been launched")
    }

    async fn stored(&self) -> prompt_eval::Evaluation {
        self.store
            .get_evaluation(self.evaluation_id)
            .await
            .unwrap()
            .expect("evaluation should exist")
    }
}

#[tokio::test]
async fn test_completed_run_reports_accuracy() {
    let mut dataset = numbered("spam", 4, true);
    dataset.extend(numbered("ham", 3, false));
    dataset.extend(messages(&[
        ("spam-mislabelled", false),
        ("fail-1", true),
        ("fail-2", true),
    ]));
    let h = Harness::new(dataset, LabelModel::default(), test_config()).await;

    let running = h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(running.status, EvaluationStatus::Running);
    assert!(running.started_at.is_some());
    assert!(running.timeout_at.is_some());

    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    let done = h.stored().await;
    assert_eq!(done.status, EvaluationStatus::Completed);
    assert_eq!(done.total_messages, 10);
    assert_eq!(done.processed_messages, 10);
    assert_eq!(done.correct_predictions, Some(7));
    assert_eq!(done.incorrect_predictions, 1);
    assert_eq!(done.error_count, Some(2));
    assert_eq!(done.accuracy, Some(87.5));
    assert!(!done.can_resume);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.correct_predictions.unwrap() + done.incorrect_predictions + done.error_count.unwrap(),
        done.processed_messages
    );

    let results = h.service.results(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(results.len(), 10);
    let errors: Vec<_> = results.iter().filter(|r| r.is_error()).collect();
    assert_eq!(errors.len(), 2);
    for error in errors {
        assert_eq!(error.retry_count, 2);
        assert!(error.llm_label.is_none());
    }
    assert_eq!(h.model.calls_for("fail-1"), 2);
    assert_eq!(h.model.calls_for("spam-0"), 1);
}

#[tokio::test]
async fn test_in_flight_calls_respect_effective_concurrency() {
    let config = test_config()
        .with_max_concurrent_requests(5)
        .with_concurrency_ratio(0.8);
    let h = Harness::new(
        numbered("spam", 20, true),
        LabelModel::with_delay(Duration::from_millis(15)),
        config,
    )
    .await;

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    assert!(h.model.max_in_flight() <= 4);
    assert!(h.model.max_in_flight() > 1);
    assert_eq!(h.stored().await.processed_messages, 20);
}

fn backoff_config() -> EngineConfig {
    test_config()
        .with_max_concurrent_requests(1)
        .with_concurrency_ratio(1.0)
        .with_backoff(
            Duration::from_millis(50),
            Duration::from_millis(200),
            Duration::from_millis(1),
        )
}

#[tokio::test]
async fn test_rate_limited_failure_raises_shared_backoff() {
    let h = Harness::new(numbered("limited", 1, true), LabelModel::default(), backoff_config()).await;
    assert_eq!(h.service.throttle().backoff(), Duration::ZERO);

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    assert_eq!(h.service.throttle().backoff(), Duration::from_millis(50));
    assert_eq!(h.stored().await.error_count, Some(1));
    assert_eq!(h.model.calls_for("limited-0"), 2);
}

#[tokio::test]
async fn test_backoff_is_waited_and_decayed_before_next_dequeue() {
    let dataset = messages(&[("limited-0", true), ("spam-0", true)]);
    let h = Harness::new(dataset, LabelModel::default(), backoff_config()).await;

    let started = tokio::time::Instant::now();
    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(h.service.throttle().backoff(), Duration::from_millis(49));
    assert_eq!(h.model.calls_for("spam-0"), 1);
    assert_eq!(h.stored().await.correct_predictions, Some(1));
}

#[tokio::test]
async fn test_recovered_rate_limit_leaves_backoff_untouched() {
    let h = Harness::new(numbered("burst", 2, false), LabelModel::default(), backoff_config()).await;

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    assert_eq!(h.service.throttle().backoff(), Duration::ZERO);
    assert_eq!(h.model.calls_for("burst-0"), 2);
    let done = h.stored().await;
    assert_eq!(done.error_count, Some(0));
    assert_eq!(done.correct_predictions, Some(2));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config().with_heartbeat_interval(Duration::ZERO);

    let result = EvaluationService::new(
        store.clone(),
        store,
        Arc::new(LabelModel::default()),
        config,
    );
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}

#[tokio::test]
async fn test_stop_then_resume_never_duplicates_work() {
    let config = test_config()
        .with_max_concurrent_requests(1)
        .with_concurrency_ratio(1.0);
    let h = Harness::new(
        numbered("spam", 20, true),
        LabelModel::with_delay(Duration::from_millis(20)),
        config,
    )
    .await;
    let mut events = h.service.subscribe(h.evaluation_id);

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    let mut completed_calls = 0;
    while completed_calls < 3 {
        match events.recv().await {
            Some(EvaluationEvent::LlmCallComplete { .. }) => completed_calls += 1,
            Some(_) => {}
            None => panic!("stream closed early"),
        }
    }

    let paused = h.service.stop(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(paused.status, EvaluationStatus::Paused);
    assert!(paused.can_resume);
    assert_eq!(paused.failure_reason.as_deref(), Some("Manually paused"));
    assert_eq!(h.run_to_end().await, RunOutcome::Stopped);

    let partial = h.store.list_results(h.evaluation_id).await.unwrap().len();
    assert!(partial >= 3 && partial < 20, "partial = {}", partial);
    assert_eq!(h.stored().await.processed_messages, partial as i64);

    let resumed = h.service.resume(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(resumed.status, EvaluationStatus::Running);
    assert_eq!(resumed.started_at, paused.started_at);
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    let done = h.stored().await;
    assert_eq!(done.status, EvaluationStatus::Completed);
    assert_eq!(done.processed_messages, 20);
    assert_eq!(h.store.list_results(h.evaluation_id).await.unwrap().len(), 20);
    assert_eq!(h.model.total_calls(), 20);
    for i in 0..20 {
        assert_eq!(h.model.calls_for(&format!("spam-{}", i)), 1);
    }
}

#[tokio::test]
async fn test_retry_errors_replaces_only_error_rows() {
    let mut dataset = numbered("spam", 3, true);
    dataset.extend(numbered("flaky", 2, false));
    let model = LabelModel::default();
    model.flaky.store(true, Ordering::SeqCst);
    let h = Harness::new(dataset, model, test_config()).await;

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);
    assert_eq!(h.stored().await.error_count, Some(2));

    let before = h.store.list_results(h.evaluation_id).await.unwrap();
    let kept: Vec<_> = before.iter().filter(|r| !r.is_error()).cloned().collect();
    assert_eq!(kept.len(), 3);

    h.model.flaky.store(false, Ordering::SeqCst);
    let running = h.service.retry_errors(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(running.status, EvaluationStatus::Running);
    assert_eq!(running.processed_messages, 3);
    assert_eq!(running.error_count, None);
    assert!(running.can_resume);
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    let after = h.store.list_results(h.evaluation_id).await.unwrap();
    assert_eq!(after.len(), 5);
    assert!(after.iter().all(|r| !r.is_error()));
    for row in &kept {
        assert!(after.contains(row), "row for message {} changed", row.dataset_message_id);
    }

    let done = h.stored().await;
    assert_eq!(done.error_count, Some(0));
    assert_eq!(done.correct_predictions, Some(5));
    assert_eq!(done.processed_messages, 5);
    assert_eq!(h.model.calls_for("spam-0"), 1);
}

#[tokio::test]
async fn test_rerun_creates_fresh_copy() {
    let h = Harness::new(numbered("ham", 3, false), LabelModel::default(), test_config()).await;
    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);
    let original = h.stored().await;

    let copy = h.service.rerun(h.evaluation_id, OWNER).await.unwrap();
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.name, "spam check (Rerun)");
    assert_eq!(copy.prompt_id, original.prompt_id);
    assert_eq!(copy.dataset_id, original.dataset_id);
    assert_eq!(copy.status, EvaluationStatus::Running);

    let outcome = h.service.wait_for_run(copy.id).await;
    assert_eq!(outcome, Some(RunOutcome::Completed));
    assert_eq!(h.store.list_results(copy.id).await.unwrap().len(), 3);
    assert_eq!(h.stored().await, original);
}

#[tokio::test]
async fn test_lifecycle_guards() {
    let h = Harness::new(numbered("spam", 2, true), LabelModel::default(), test_config()).await;
    let id = h.evaluation_id;

    let err = h.service.start(id, "mallory").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(err.status_code(), 403);

    let err = h.service.start(9999, OWNER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.status_code(), 404);

    for result in [
        h.service.resume(id, OWNER).await,
        h.service.stop(id, OWNER).await,
        h.service.reset(id, OWNER).await,
        h.service.retry_errors(id, OWNER).await,
        h.service.rerun(id, OWNER).await,
    ] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState, "{}", err);
        assert_eq!(err.status_code(), 400);
    }

    h.service.start(id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    let err = h.service.start(id, OWNER).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot start evaluation in completed state");
    let err = h.service.retry_errors(id, OWNER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = h
        .service
        .create_evaluation(
            NewEvaluationRequest {
                name: "orphan".to_string(),
                description: None,
                prompt_id: 1,
                dataset_id: 42,
            },
            OWNER,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_failed_write_marks_run_failed_and_reset_recovers() {
    let h = Harness::new(numbered("spam", 4, true), LabelModel::default(), test_config()).await;
    h.store.fail_result_writes(true);
    let mut events = h.service.subscribe(h.evaluation_id);

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert!(matches!(h.run_to_end().await, RunOutcome::Failed(_)));

    let failed = h.stored().await;
    assert_eq!(failed.status, EvaluationStatus::Failed);
    assert!(failed.can_resume);
    assert!(failed.failure_reason.is_some());

    let mut kinds = Vec::new();
    while let Some(event) = events.recv().await {
        kinds.push(event.kind());
    }
    assert!(kinds.contains(&"error"));
    assert_eq!(kinds.last(), Some(&"complete"));

    let reset = h.service.reset(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(reset.status, EvaluationStatus::Pending);
    assert_eq!(reset.processed_messages, 0);
    assert_eq!(reset.started_at, None);
    assert_eq!(reset.failure_reason, None);
    assert!(!reset.can_resume);
    assert_eq!(h.store.list_results(h.evaluation_id).await.unwrap().len(), 0);

    h.store.fail_result_writes(false);
    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);
    assert_eq!(h.stored().await.processed_messages, 4);
}

#[tokio::test]
async fn test_timeout_fails_run_but_keeps_it_resumable() {
    let config = test_config()
        .with_max_concurrent_requests(1)
        .with_concurrency_ratio(1.0)
        .with_evaluation_timeout(Duration::from_millis(1));
    let h = Harness::new(
        numbered("spam", 10, true),
        LabelModel::with_delay(Duration::from_millis(20)),
        config,
    )
    .await;

    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(
        h.run_to_end().await,
        RunOutcome::Failed("Evaluation exceeded timeout limit".to_string())
    );

    let failed = h.stored().await;
    assert_eq!(failed.status, EvaluationStatus::Failed);
    assert!(failed.can_resume);
    assert_eq!(
        failed.failure_reason.as_deref(),
        Some("Evaluation exceeded timeout limit")
    );
    assert!(failed.processed_messages < 10);
}

#[tokio::test]
async fn test_validate_status_flags_run_orphaned_by_restart() {
    let h = Harness::new(
        numbered("spam", 30, true),
        LabelModel::with_delay(Duration::from_millis(20)),
        test_config()
            .with_max_concurrent_requests(1)
            .with_concurrency_ratio(1.0),
    )
    .await;
    h.service.start(h.evaluation_id, OWNER).await.unwrap();

    let report = h.service.validate_status(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(report.display_status, ObservedStatus::Running);
    assert!(!report.is_stuck);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let restarted = EvaluationService::new(
        h.store.clone(),
        h.store.clone(),
        h.model.clone(),
        test_config(),
    )
    .unwrap();
    let report = restarted
        .validate_status(h.evaluation_id, OWNER)
        .await
        .unwrap();
    assert_eq!(report.display_status, ObservedStatus::Stuck);
    assert_eq!(report.actual_status, EvaluationStatus::Running);
    assert!(report.is_stuck);
    assert!(report.can_resume);
    assert_eq!(
        report.reason.as_deref(),
        Some("Evaluation was interrupted by a server restart")
    );
    assert!(h.stored().await.can_resume);

    h.service.stop(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Stopped);
}

#[tokio::test]
async fn test_validate_status_flags_stale_heartbeat_and_timeout() {
    let h = Harness::new(
        numbered("spam", 2, true),
        LabelModel::default(),
        test_config().with_stale_heartbeat(Duration::from_secs(60)),
    )
    .await;
    let id = h.evaluation_id;
    let now = Utc::now();

    h.store
        .update_status(
            id,
            EvaluationStatus::Running,
            StatusUpdate::new().last_heartbeat(Some(now - chrono::Duration::minutes(10))),
        )
        .await
        .unwrap();
    let report = h.service.validate_status(id, OWNER).await.unwrap();
    assert_eq!(report.display_status, ObservedStatus::Stuck);
    assert_eq!(
        report.reason.as_deref(),
        Some("No heartbeat for more than 1 minutes")
    );
    let refreshed = h.stored().await;
    assert!(refreshed.can_resume);
    assert!(refreshed.last_heartbeat.unwrap() > now - chrono::Duration::minutes(1));

    h.store
        .update_status(
            id,
            EvaluationStatus::Running,
            StatusUpdate::new()
                .last_heartbeat(Some(Utc::now()))
                .timeout_at(Some(now - chrono::Duration::minutes(1))),
        )
        .await
        .unwrap();
    let report = h.service.validate_status(id, OWNER).await.unwrap();
    assert_eq!(report.display_status, ObservedStatus::Timeout);
    assert!(report.is_stuck);
    assert_eq!(
        report.reason.as_deref(),
        Some("Evaluation exceeded timeout limit")
    );
}

#[tokio::test]
async fn test_event_stream_ends_with_final_snapshot() {
    let h = Harness::new(numbered("spam", 5, true), LabelModel::default(), test_config()).await;
    let mut events = h.service.subscribe(h.evaluation_id);

    h.service.start(h.evaluation_id, OWNER).await.unwrap();

    let collected = tokio::time::timeout(Duration::from_secs(10), async {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        collected
    })
    .await
    .expect("stream should close");

    let starts = collected
        .iter()
        .filter(|e| matches!(e, EvaluationEvent::LlmCallStart { .. }))
        .count();
    assert_eq!(starts, 5);
    assert!(collected
        .iter()
        .any(|e| matches!(e, EvaluationEvent::LlmBatchStart { message_count: 5, .. })));
    match collected.last() {
        Some(EvaluationEvent::Complete { data }) => {
            assert_eq!(data.status, EvaluationStatus::Completed);
            assert_eq!(data.processed_messages, 5);
        }
        other => panic!("unexpected final event: {:?}", other),
    }
    assert_eq!(h.service.events().connection_count(h.evaluation_id), 0);
}

#[tokio::test]
async fn test_delete_removes_evaluation() {
    let h = Harness::new(numbered("spam", 2, true), LabelModel::default(), test_config()).await;
    h.service.start(h.evaluation_id, OWNER).await.unwrap();
    assert_eq!(h.run_to_end().await, RunOutcome::Completed);

    h.service.delete(h.evaluation_id, OWNER).await.unwrap();
    let err = h.service.get(h.evaluation_id, OWNER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.store.list_results(h.evaluation_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_backed_run() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let prompt = store
        .insert_prompt(NewPrompt::new(
            "spam",
            "test-model",
            "Classify: {{messageContent}}",
            "<r>",
            "</r>",
        ))
        .await
        .unwrap();
    let mut dataset = numbered("spam", 3, true);
    dataset.extend(messages(&[("ham-0", false), ("fail-0", false)]));
    let dataset_id = store.insert_dataset("inbox", &dataset).await.unwrap();

    let service = EvaluationService::new(
        store.clone(),
        store.clone(),
        Arc::new(LabelModel::default()),
        test_config(),
    )
    .unwrap();
    let evaluation = service
        .create_evaluation(
            NewEvaluationRequest {
                name: "sqlite".to_string(),
                description: Some("end to end".to_string()),
                prompt_id: prompt.id,
                dataset_id,
            },
            OWNER,
        )
        .await
        .unwrap();
    assert_eq!(evaluation.total_messages, 5);

    service.start(evaluation.id, OWNER).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), service.wait_for_run(evaluation.id))
        .await
        .unwrap();
    assert_eq!(outcome, Some(RunOutcome::Completed));

    let done = service.get(evaluation.id, OWNER).await.unwrap();
    assert_eq!(done.status, EvaluationStatus::Completed);
    assert_eq!(done.correct_predictions, Some(4));
    assert_eq!(done.error_count, Some(1));
    assert_eq!(done.accuracy, Some(100.0));
    assert_eq!(service.results(evaluation.id, OWNER).await.unwrap().len(), 5);
}
