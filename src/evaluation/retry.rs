//! Per-message model calls with retries.
//!
//! A [`MessageProcessor`] owns everything one message needs: the rendered
//! prompt template, generation parameters and the shared throttle. Each call
//! to [`MessageProcessor::process`] writes exactly one result row for the
//! message, either the model's answer or the last error once every attempt
//! has been used.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::extractor::extract_label;
use super::scheduler::PassContext;
use super::throttle::Throttle;
use super::types::{DatasetMessage, NewEvaluationResult, PromptConfig};
use crate::error::StoreError;
use crate::events::{EvaluationEvent, EventBroadcaster};
use crate::llm::{invoke_model, GenerationParams, LlmProvider};
use crate::metrics::{CallStatus, MessageOutcome, MetricsCollector};
use crate::storage::EvaluationStore;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub message_id: i64,
    /// A model answer was stored, labelled or not.
    pub success: bool,
    /// Response time of the stored answer, zero for error rows.
    pub response_time_ms: u64,
    /// Every attempt failed and the last one was rejected by the provider's
    /// rate limiter.
    pub rate_limited: bool,
}

/// Runs model calls for the messages of one evaluation.
pub struct MessageProcessor {
    evaluation_id: i64,
    prompt: PromptConfig,
    params: GenerationParams,
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn EvaluationStore>,
    events: EventBroadcaster,
    throttle: Arc<Throttle>,
    retry_attempts: u32,
    retry_delay: Duration,
    llm_timeout: Duration,
    metrics: MetricsCollector,
}

impl MessageProcessor {
    /// `stop_sequences` is the copy captured on the evaluation; an empty list
    /// falls back to the prompt's own.
    pub fn new(
        ctx: &PassContext,
        evaluation_id: i64,
        prompt: PromptConfig,
        stop_sequences: &[String],
    ) -> Self {
        let params = prompt.generation_params(stop_sequences);
        Self {
            evaluation_id,
            prompt,
            params,
            provider: ctx.provider.clone(),
            store: ctx.store.clone(),
            events: ctx.events.clone(),
            throttle: ctx.throttle.clone(),
            retry_attempts: ctx.config.retry_attempts.max(1),
            retry_delay: ctx.config.retry_delay,
            llm_timeout: ctx.config.llm_timeout,
            metrics: ctx.metrics,
        }
    }

    /// Generation parameters sent with every call.
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Classifies one message and stores its result.
    ///
    /// Model failures are absorbed into an error row; only a failing store
    /// write is returned as an error.
    pub async fn process(&self, message: &DatasetMessage) -> Result<ProcessedMessage, StoreError> {
        let model = self.prompt.model_id.as_str();
        let attempts = self.retry_attempts;
        let mut last_error: Option<String> = None;
        let mut last_rate_limited = false;

        self.events.publish(
            self.evaluation_id,
            EvaluationEvent::LlmCallStart {
                message_id: message.id,
            },
        );

        for attempt in 0..attempts {
            let has_next = attempt + 1 < attempts;
            self.throttle.wait_for_cooldown().await;

            let rendered = self.prompt.render(&message.message_content);
            let started = Instant::now();
            self.metrics.call_started();
            let call = invoke_model(
                self.provider.as_ref(),
                model,
                &rendered,
                &self.params,
                self.llm_timeout,
            )
            .await;
            self.metrics.call_finished();

            match call {
                Ok(invocation) => {
                    self.metrics.record_llm_call(
                        model,
                        CallStatus::Success,
                        Duration::from_millis(invocation.response_time_ms),
                    );

                    let label = extract_label(
                        &invocation.content,
                        &self.prompt.opening_tag,
                        &self.prompt.closing_tag,
                    );
                    if label.is_none() && attempt == 0 && has_next {
                        debug!(
                            evaluation_id = self.evaluation_id,
                            message_id = message.id,
                            "No label in response, retrying"
                        );
                        self.metrics.record_retry();
                        continue;
                    }

                    self.store
                        .insert_result(NewEvaluationResult::answered(
                            self.evaluation_id,
                            message.id,
                            label,
                            invocation.content,
                            invocation.response_time_ms,
                            attempt,
                        ))
                        .await?;

                    self.metrics.record_message(if label.is_some() {
                        MessageOutcome::Labelled
                    } else {
                        MessageOutcome::Unlabelled
                    });
                    self.events.publish(
                        self.evaluation_id,
                        EvaluationEvent::LlmCallComplete {
                            message_id: message.id,
                            success: true,
                            error: None,
                        },
                    );

                    return Ok(ProcessedMessage {
                        message_id: message.id,
                        success: true,
                        response_time_ms: invocation.response_time_ms,
                        rate_limited: false,
                    });
                }
                Err(err) => {
                    let limited = err.is_rate_limited();
                    last_rate_limited = limited;
                    self.metrics.record_llm_call(
                        model,
                        if limited {
                            CallStatus::RateLimited
                        } else {
                            CallStatus::Failure
                        },
                        started.elapsed(),
                    );
                    self.throttle.record_error();

                    warn!(
                        evaluation_id = self.evaluation_id,
                        message_id = message.id,
                        attempt = attempt + 1,
                        attempts,
                        rate_limited = limited,
                        error = %err,
                        "LLM call failed"
                    );
                    last_error = Some(err.to_string());

                    if has_next {
                        self.metrics.record_retry();
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| "No response from model".to_string());
        self.store
            .insert_result(NewEvaluationResult::failed(
                self.evaluation_id,
                message.id,
                error.clone(),
                attempts,
            ))
            .await?;

        self.metrics.record_message(MessageOutcome::Error);
        self.events.publish(
            self.evaluation_id,
            EvaluationEvent::LlmCallComplete {
                message_id: message.id,
                success: false,
                error: Some(error),
            },
        );

        Ok(ProcessedMessage {
            message_id: message.id,
            success: false,
            response_time_ms: 0,
            rate_limited: last_rate_limited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::evaluation::{EngineConfig, ResultFilter};
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, Message, Usage};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of replies, then keeps failing.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::RequestFailed("script exhausted".into())))?;
            Ok(GenerationResponse {
                id: "resp".to_string(),
                model: request.model,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(reply),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn prompt() -> PromptConfig {
        PromptConfig {
            id: 1,
            name: "spam".to_string(),
            model_id: "test-model".to_string(),
            prompt_text: "Classify: {{messageContent}}".to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
            opening_tag: "<r>".to_string(),
            closing_tag: "</r>".to_string(),
        }
    }

    fn message() -> DatasetMessage {
        DatasetMessage {
            id: 11,
            message_content: "win a prize".to_string(),
            label: true,
        }
    }

    fn setup(
        provider: Arc<ScriptedProvider>,
    ) -> (MessageProcessor, Arc<MemoryStore>, EventBroadcaster) {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::default()
            .with_retry_attempts(3)
            .with_retry_delay(Duration::from_millis(500))
            .with_error_cooldown(Duration::from_secs(5));
        let ctx = PassContext::new(
            store.clone(),
            store.clone(),
            provider,
            EventBroadcaster::default(),
            Arc::new(Throttle::from_config(&config)),
            config,
        );
        let events = ctx.events.clone();
        (MessageProcessor::new(&ctx, 5, prompt(), &[]), store, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_answer_is_stored() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("<r>true</r>".to_string())]));
        let (processor, store, events) = setup(provider.clone());
        let mut subscription = events.subscribe(5);

        let outcome = processor.process(&message()).await.expect("process");
        assert!(outcome.success);
        assert!(!outcome.rate_limited);
        assert_eq!(provider.calls(), 1);
        assert_eq!(
            provider.prompts.lock().unwrap()[0],
            "Classify: win a prize"
        );

        let results = store.list_results(5).await.expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].llm_label, Some(true));
        assert_eq!(results[0].retry_count, 0);

        assert_eq!(
            subscription.try_recv(),
            Some(EvaluationEvent::LlmCallStart { message_id: 11 })
        );
        assert_eq!(
            subscription.try_recv(),
            Some(EvaluationEvent::LlmCallComplete {
                message_id: 11,
                success: true,
                error: None
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_tags_retry_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("I think so".to_string()),
            Ok("still no tags".to_string()),
        ]));
        let (processor, store, _events) = setup(provider.clone());

        let outcome = processor.process(&message()).await.expect("process");
        assert!(outcome.success);
        assert_eq!(provider.calls(), 2);

        let results = store.list_results(5).await.expect("results");
        assert_eq!(results[0].llm_label, None);
        assert_eq!(results[0].llm_full_response.as_deref(), Some("still no tags"));
        assert_eq!(results[0].retry_count, 1);
        assert!(!results[0].is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_success_waits_out_cooldown() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RequestFailed("connection reset".into())),
            Ok("<r>false</r>".to_string()),
        ]));
        let (processor, store, _events) = setup(provider.clone());

        let started = Instant::now();
        let outcome = processor.process(&message()).await.expect("process");
        assert!(outcome.success);
        assert!(started.elapsed() >= Duration::from_secs(5));

        let results = store.list_results(5).await.expect("results");
        assert_eq!(results[0].llm_label, Some(false));
        assert_eq!(results[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_store_error_row() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RequestFailed("one".into())),
            Err(LlmError::RateLimited("slow down".into())),
            Err(LlmError::RequestFailed("three".into())),
        ]));
        let (processor, store, events) = setup(provider.clone());
        let mut subscription = events.subscribe(5);

        let outcome = processor.process(&message()).await.expect("process");
        assert!(!outcome.success);
        assert!(!outcome.rate_limited);
        assert_eq!(outcome.response_time_ms, 0);
        assert_eq!(provider.calls(), 3);

        let results = store.list_results(5).await.expect("results");
        assert_eq!(results.len(), 1);
        let row = &results[0];
        assert!(row.is_error());
        assert_eq!(row.llm_label, None);
        assert_eq!(row.llm_full_response, None);
        assert_eq!(row.response_time_ms, 0);
        assert_eq!(row.retry_count, 3);
        assert!(row.error_message.as_deref().unwrap_or("").contains("three"));
        assert_eq!(
            store
                .count_results(5, ResultFilter::ErrorsOnly)
                .await
                .expect("count"),
            1
        );

        subscription.try_recv();
        match subscription.try_recv() {
            Some(EvaluationEvent::LlmCallComplete { success, error, .. }) => {
                assert!(!success);
                assert!(error.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_followed_by_answer_is_not_rate_limited() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("slow down".into())),
            Ok("<r>true</r>".to_string()),
        ]));
        let (processor, _store, _events) = setup(provider.clone());

        let outcome = processor.process(&message()).await.expect("process");
        assert!(outcome.success);
        assert!(!outcome.rate_limited);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_rate_limit_error_marks_outcome() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RequestFailed("one".into())),
            Err(LlmError::RequestFailed("two".into())),
            Err(LlmError::ApiError {
                code: 429,
                message: "too many requests".into(),
            }),
        ]));
        let (processor, _store, _events) = setup(provider);

        let outcome = processor.process(&message()).await.expect("process");
        assert!(!outcome.success);
        assert!(outcome.rate_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("<r>true</r>".to_string())]));
        let (processor, store, _events) = setup(provider);
        store.fail_result_writes(true);

        assert!(processor.process(&message()).await.is_err());
    }
}
