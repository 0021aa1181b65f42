//! In-process store used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DatasetCatalog, EvaluationStore, NewPrompt, PromptCatalog};
use crate::error::StoreError;
use crate::evaluation::{
    DatasetMessage, Evaluation, EvaluationResult, EvaluationStatus, NewEvaluation,
    NewEvaluationResult, PromptConfig, ResultFilter, StatusUpdate,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    evaluations: BTreeMap<i64, Evaluation>,
    /// Keyed by (evaluation id, dataset message id).
    results: BTreeMap<(i64, i64), EvaluationResult>,
    prompts: HashMap<i64, PromptConfig>,
    datasets: HashMap<i64, (String, Vec<DatasetMessage>)>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store keeping everything in a mutex-guarded map.
///
/// Ids are allocated from one counter shared by all record types.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_result_writes: AtomicBool,
    concurrent_writes: AtomicUsize,
    max_concurrent_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a prompt and returns it with its assigned id.
    pub fn insert_prompt(&self, prompt: NewPrompt) -> PromptConfig {
        let mut state = self.state();
        let id = state.next_id();
        let config = prompt.into_config(id);
        state.prompts.insert(id, config.clone());
        config
    }

    /// Inserts a dataset with its labelled messages and returns its id.
    pub fn insert_dataset(&self, name: &str, messages: &[(String, bool)]) -> i64 {
        let mut state = self.state();
        let dataset_id = state.next_id();
        let rows = messages
            .iter()
            .map(|(content, label)| DatasetMessage {
                id: state.next_id(),
                message_content: content.clone(),
                label: *label,
            })
            .collect();
        state.datasets.insert(dataset_id, (name.to_string(), rows));
        dataset_id
    }

    /// Makes every subsequent `insert_result` fail until reset.
    pub fn fail_result_writes(&self, fail: bool) {
        self.fail_result_writes.store(fail, Ordering::SeqCst);
    }

    /// Highest number of write calls observed running at the same time.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_concurrent_writes.load(Ordering::SeqCst)
    }

    /// Tracks overlapping writes; the yield gives concurrent callers a
    /// chance to interleave when nothing serializes them.
    async fn track_write(&self) -> WriteGuard<'_> {
        let now = self.concurrent_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_writes.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        WriteGuard { store: self }
    }

    fn not_found(id: i64) -> StoreError {
        StoreError::NotFound(format!("Evaluation {}", id))
    }
}

struct WriteGuard<'a> {
    store: &'a MemoryStore,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.store.concurrent_writes.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<Evaluation, StoreError> {
        let _write = self.track_write().await;
        let mut state = self.state();
        let id = state.next_id();
        let evaluation = Evaluation {
            id,
            name: new.name,
            description: new.description,
            prompt_id: new.prompt_id,
            dataset_id: new.dataset_id,
            stop_sequences: new.stop_sequences,
            status: EvaluationStatus::Pending,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            timeout_at: None,
            can_resume: false,
            failure_reason: None,
            total_messages: new.total_messages,
            processed_messages: 0,
            correct_predictions: None,
            incorrect_predictions: 0,
            error_count: None,
            accuracy: None,
            total_time_ms: 0,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        state.evaluations.insert(id, evaluation.clone());
        Ok(evaluation)
    }

    async fn get_evaluation(&self, id: i64) -> Result<Option<Evaluation>, StoreError> {
        Ok(self.state().evaluations.get(&id).cloned())
    }

    async fn delete_evaluation(&self, id: i64) -> Result<(), StoreError> {
        let _write = self.track_write().await;
        let mut state = self.state();
        state
            .evaluations
            .remove(&id)
            .ok_or_else(|| Self::not_found(id))?;
        state.results.retain(|(evaluation_id, _), _| *evaluation_id != id);
        Ok(())
    }

    async fn update_status(
        &self,
        id: i64,
        status: EvaluationStatus,
        update: StatusUpdate,
    ) -> Result<Evaluation, StoreError> {
        let _write = self.track_write().await;
        let mut state = self.state();
        let evaluation = state
            .evaluations
            .get_mut(&id)
            .ok_or_else(|| Self::not_found(id))?;
        evaluation.status = status;
        update.apply_to(evaluation);
        Ok(evaluation.clone())
    }

    async fn update_progress(
        &self,
        id: i64,
        processed_messages: i64,
        total_time_ms: i64,
    ) -> Result<(), StoreError> {
        let _write = self.track_write().await;
        let mut state = self.state();
        let evaluation = state
            .evaluations
            .get_mut(&id)
            .ok_or_else(|| Self::not_found(id))?;
        evaluation.processed_messages = processed_messages;
        evaluation.total_time_ms = total_time_ms;
        Ok(())
    }

    async fn touch_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let _write = self.track_write().await;
        if let Some(evaluation) = self.state().evaluations.get_mut(&id) {
            evaluation.last_heartbeat = Some(at);
        }
        Ok(())
    }

    async fn insert_result(
        &self,
        result: NewEvaluationResult,
    ) -> Result<EvaluationResult, StoreError> {
        let _write = self.track_write().await;
        if self.fail_result_writes.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData(
                "result writes are disabled".to_string(),
            ));
        }

        let mut state = self.state();
        let key = (result.evaluation_id, result.dataset_message_id);
        let id = match state.results.get(&key) {
            Some(existing) => existing.id,
            None => state.next_id(),
        };
        let stored = EvaluationResult {
            id,
            evaluation_id: result.evaluation_id,
            dataset_message_id: result.dataset_message_id,
            llm_label: result.llm_label,
            llm_full_response: result.llm_full_response,
            response_time_ms: result.response_time_ms,
            error_message: result.error_message,
            retry_count: result.retry_count,
            created_at: Utc::now(),
        };
        state.results.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_results(&self, evaluation_id: i64) -> Result<Vec<EvaluationResult>, StoreError> {
        Ok(self
            .state()
            .results
            .range((evaluation_id, i64::MIN)..=(evaluation_id, i64::MAX))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        let _write = self.track_write().await;
        let mut state = self.state();
        let before = state.results.len();
        state.results.retain(|(eid, _), r| {
            *eid != evaluation_id || (filter == ResultFilter::ErrorsOnly && !r.is_error())
        });
        Ok((before - state.results.len()) as u64)
    }

    async fn count_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        let results = self.list_results(evaluation_id).await?;
        Ok(results
            .iter()
            .filter(|r| filter == ResultFilter::All || r.is_error())
            .count() as u64)
    }
}

#[async_trait]
impl PromptCatalog for MemoryStore {
    async fn get_prompt(&self, id: i64) -> Result<Option<PromptConfig>, StoreError> {
        Ok(self.state().prompts.get(&id).cloned())
    }
}

#[async_trait]
impl DatasetCatalog for MemoryStore {
    async fn dataset_exists(&self, dataset_id: i64) -> Result<bool, StoreError> {
        Ok(self.state().datasets.contains_key(&dataset_id))
    }

    async fn dataset_messages(&self, dataset_id: i64) -> Result<Vec<DatasetMessage>, StoreError> {
        Ok(self
            .state()
            .datasets
            .get(&dataset_id)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_filters() {
        let store = MemoryStore::new();
        let dataset = store.insert_dataset("inbox", &[
            ("a".to_string(), true),
            ("b".to_string(), false),
            ("c".to_string(), true),
        ]);
        let messages = store.dataset_messages(dataset).await.expect("messages");

        for (i, m) in messages.iter().enumerate() {
            let result = if i == 1 {
                NewEvaluationResult::failed(7, m.id, "boom".to_string(), 3)
            } else {
                NewEvaluationResult::answered(7, m.id, Some(true), "x".to_string(), 5, 0)
            };
            store.insert_result(result).await.expect("insert");
        }
        store
            .insert_result(NewEvaluationResult::failed(8, messages[0].id, "other".to_string(), 1))
            .await
            .expect("insert");

        assert_eq!(store.count_results(7, ResultFilter::All).await.expect("count"), 3);
        assert_eq!(
            store
                .count_results(7, ResultFilter::ErrorsOnly)
                .await
                .expect("count"),
            1
        );
        assert_eq!(
            store
                .delete_results(7, ResultFilter::ErrorsOnly)
                .await
                .expect("delete"),
            1
        );
        assert_eq!(store.count_results(7, ResultFilter::All).await.expect("count"), 2);
        assert_eq!(store.count_results(8, ResultFilter::All).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_failing_result_writes() {
        let store = MemoryStore::new();
        store.fail_result_writes(true);
        let err = store
            .insert_result(NewEvaluationResult::failed(1, 1, "x".to_string(), 1))
            .await;
        assert!(err.is_err());

        store.fail_result_writes(false);
        assert!(store
            .insert_result(NewEvaluationResult::failed(1, 1, "x".to_string(), 1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_evaluation() {
        let store = MemoryStore::new();
        let err = store
            .update_status(42, EvaluationStatus::Running, StatusUpdate::new())
            .await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }
}
