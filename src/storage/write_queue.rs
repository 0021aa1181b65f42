//! Single-writer queue for store mutations.
//!
//! Concurrent message tasks all write results and progress for the same
//! evaluation. [`WriteQueue`] runs every submitted write on one worker task,
//! one at a time and in submission order; [`SerializedStore`] wraps any
//! [`EvaluationStore`] so that its writes go through the queue while reads
//! hit the inner store directly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use super::EvaluationStore;
use crate::error::StoreError;
use crate::evaluation::{
    Evaluation, EvaluationResult, EvaluationStatus, NewEvaluation, NewEvaluationResult,
    ResultFilter, StatusUpdate,
};

/// Default number of writes that may wait in the queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type Job = BoxFuture<'static, ()>;

/// FIFO of write jobs drained by a single background task.
///
/// Must be created inside a tokio runtime. The worker exits once every
/// handle to the queue is dropped.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<Job>,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!("Write queue drained");
        });
        Self { tx }
    }

    /// Runs `write` on the worker after every earlier submission has
    /// finished, and returns its output.
    pub async fn submit<F, T>(&self, write: F) -> Result<T, StoreError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = reply_tx.send(write.await);
        });

        self.tx.send(job).await.map_err(|_| StoreError::QueueClosed)?;
        reply_rx.await.map_err(|_| StoreError::QueueClosed)
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// [`EvaluationStore`] whose writes are serialized through a [`WriteQueue`].
#[derive(Clone)]
pub struct SerializedStore {
    inner: Arc<dyn EvaluationStore>,
    queue: WriteQueue,
}

impl SerializedStore {
    pub fn new(inner: Arc<dyn EvaluationStore>) -> Self {
        Self::with_queue(inner, WriteQueue::default())
    }

    pub fn with_queue(inner: Arc<dyn EvaluationStore>, queue: WriteQueue) -> Self {
        Self { inner, queue }
    }

    pub fn inner(&self) -> &Arc<dyn EvaluationStore> {
        &self.inner
    }
}

#[async_trait]
impl EvaluationStore for SerializedStore {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<Evaluation, StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.create_evaluation(new).await })
            .await?
    }

    async fn get_evaluation(&self, id: i64) -> Result<Option<Evaluation>, StoreError> {
        self.inner.get_evaluation(id).await
    }

    async fn delete_evaluation(&self, id: i64) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.delete_evaluation(id).await })
            .await?
    }

    async fn update_status(
        &self,
        id: i64,
        status: EvaluationStatus,
        update: StatusUpdate,
    ) -> Result<Evaluation, StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.update_status(id, status, update).await })
            .await?
    }

    async fn update_progress(
        &self,
        id: i64,
        processed_messages: i64,
        total_time_ms: i64,
    ) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move {
                inner
                    .update_progress(id, processed_messages, total_time_ms)
                    .await
            })
            .await?
    }

    async fn touch_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.touch_heartbeat(id, at).await })
            .await?
    }

    async fn insert_result(
        &self,
        result: NewEvaluationResult,
    ) -> Result<EvaluationResult, StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.insert_result(result).await })
            .await?
    }

    async fn list_results(&self, evaluation_id: i64) -> Result<Vec<EvaluationResult>, StoreError> {
        self.inner.list_results(evaluation_id).await
    }

    async fn delete_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.clone();
        self.queue
            .submit(async move { inner.delete_results(evaluation_id, filter).await })
            .await?
    }

    async fn count_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        self.inner.count_results(evaluation_id, filter).await
    }
}
