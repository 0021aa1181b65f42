//! Live event streams for evaluations.
//!
//! Scheduler passes and lifecycle operations publish [`EvaluationEvent`]s; any
//! number of observers subscribe per evaluation and receive them in order.
//!
//! ```ignore
//! use prompt_eval::events::EventBroadcaster;
//!
//! let broadcaster = EventBroadcaster::default();
//! let mut subscription = broadcaster.subscribe(evaluation_id);
//! while let Some(event) = subscription.recv().await {
//!     print!("{}", event.to_sse_frame()?);
//! }
//! ```

pub mod broadcaster;
pub mod types;

pub use broadcaster::{EventBroadcaster, Subscription, DEFAULT_EVENT_BUFFER};
pub use types::EvaluationEvent;
