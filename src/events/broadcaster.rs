//! Per-evaluation publish/subscribe fan-out.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::EvaluationEvent;
use crate::evaluation::Evaluation;
use crate::metrics::MetricsCollector;

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<EvaluationEvent>,
}

type SubscriberMap = HashMap<i64, Vec<Subscriber>>;

fn lock(map: &Mutex<SubscriberMap>) -> MutexGuard<'_, SubscriberMap> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fans evaluation events out to every live subscriber of that evaluation.
///
/// Cloning is cheap and every clone shares the same subscriber table.
#[derive(Clone)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<SubscriberMap>>,
    buffer: usize,
    metrics: MetricsCollector,
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    /// Registers a new subscriber for `evaluation_id`.
    pub fn subscribe(&self, evaluation_id: i64) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let total = {
            let mut map = lock(&self.subscribers);
            map.entry(evaluation_id)
                .or_default()
                .push(Subscriber { id, tx });
            map.values().map(Vec::len).sum()
        };
        self.metrics.set_subscribers(total);
        debug!(evaluation_id, subscriber = %id, "Event subscriber added");

        Subscription {
            evaluation_id,
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
            metrics: self.metrics,
        }
    }

    /// Sends `event` to every subscriber of `evaluation_id`.
    ///
    /// Subscribers whose receiver is gone are dropped from the table. A
    /// subscriber whose buffer is full misses this event.
    pub fn publish(&self, evaluation_id: i64, event: EvaluationEvent) {
        let total = {
            let mut map = lock(&self.subscribers);
            let Some(list) = map.get_mut(&evaluation_id) else {
                return;
            };

            list.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        evaluation_id,
                        subscriber = %sub.id,
                        event = event.kind(),
                        "Event subscriber lagging, dropping event"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(evaluation_id, subscriber = %sub.id, "Removing closed event subscriber");
                    false
                }
            });

            if list.is_empty() {
                map.remove(&evaluation_id);
            }
            map.values().map(Vec::len).sum()
        };
        self.metrics.set_subscribers(total);
    }

    /// Publishes a snapshot of `evaluation`.
    pub fn publish_snapshot(&self, evaluation: &Evaluation) {
        self.publish(
            evaluation.id,
            EvaluationEvent::Evaluation {
                data: evaluation.clone(),
            },
        );
    }

    /// Sends the final `complete` event and closes every subscriber of the
    /// evaluation.
    pub fn complete(&self, evaluation: &Evaluation) {
        let (closing, total) = {
            let mut map = lock(&self.subscribers);
            let closing = map.remove(&evaluation.id).unwrap_or_default();
            (closing, map.values().map(Vec::len).sum())
        };

        let event = EvaluationEvent::Complete {
            data: evaluation.clone(),
        };
        for sub in &closing {
            if let Err(TrySendError::Full(_)) = sub.tx.try_send(event.clone()) {
                warn!(
                    evaluation_id = evaluation.id,
                    subscriber = %sub.id,
                    "Event subscriber lagging, completion event dropped"
                );
            }
        }
        self.metrics.set_subscribers(total);
        debug!(
            evaluation_id = evaluation.id,
            closed = closing.len(),
            "Closed event subscribers"
        );
    }

    /// Open subscriptions for one evaluation.
    pub fn connection_count(&self, evaluation_id: i64) -> usize {
        lock(&self.subscribers)
            .get(&evaluation_id)
            .map_or(0, Vec::len)
    }

    /// Open subscriptions across all evaluations.
    pub fn total_connections(&self) -> usize {
        lock(&self.subscribers).values().map(Vec::len).sum()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    evaluation_id: i64,
    id: Uuid,
    rx: mpsc::Receiver<EvaluationEvent>,
    subscribers: Arc<Mutex<SubscriberMap>>,
    metrics: MetricsCollector,
}

impl Subscription {
    pub fn evaluation_id(&self) -> i64 {
        self.evaluation_id
    }

    /// Waits for the next event; `None` once the stream has been closed.
    pub async fn recv(&mut self) -> Option<EvaluationEvent> {
        self.rx.recv().await
    }

    /// Returns an already buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<EvaluationEvent> {
        self.rx.try_recv().ok()
    }

    /// Explicitly ends the subscription.
    pub fn unsubscribe(self) {}

    /// The subscription as a plain event stream, e.g. for an SSE body.
    pub fn into_stream(self) -> impl Stream<Item = EvaluationEvent> + Send + Unpin {
        self
    }

    fn detach(&self) {
        let total = {
            let mut map = lock(&self.subscribers);
            if let Some(list) = map.get_mut(&self.evaluation_id) {
                list.retain(|sub| sub.id != self.id);
                if list.is_empty() {
                    map.remove(&self.evaluation_id);
                }
            }
            map.values().map(Vec::len).sum()
        };
        self.metrics.set_subscribers(total);
    }
}

impl Stream for Subscription {
    type Item = EvaluationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
