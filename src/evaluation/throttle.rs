//! Process-wide throttling shared by every scheduler pass.
//!
//! Two independent mechanisms slow the engine down after provider distress:
//!
//! - **Cooldown**: after any failed model call, new calls wait until a fixed
//!   window has elapsed since that failure.
//! - **Backoff**: a rate-limited message outcome escalates a delay that is
//!   inserted before the next dequeue (1s first, doubling, capped), and
//!   shrinks by a fixed step every time it is consumed.
//!
//! One [`Throttle`] is created per engine and handed to every pass, so a
//! provider signal observed by one run slows all runs.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use crate::metrics::MetricsCollector;

#[derive(Debug, Default)]
struct ThrottleState {
    last_error_at: Option<Instant>,
    backoff: Duration,
}

/// Shared cooldown and backoff state.
#[derive(Debug)]
pub struct Throttle {
    cooldown: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_decay: Duration,
    state: Mutex<ThrottleState>,
    metrics: MetricsCollector,
}

impl Throttle {
    pub fn new(
        cooldown: Duration,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_decay: Duration,
    ) -> Self {
        Self {
            cooldown,
            initial_backoff,
            max_backoff,
            backoff_decay,
            state: Mutex::new(ThrottleState::default()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.error_cooldown,
            config.initial_backoff,
            config.max_backoff,
            config.backoff_decay,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        // The state is plain data, a poisoned lock still holds a usable value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks a model failure, opening the cooldown window.
    pub fn record_error(&self) {
        self.lock().last_error_at = Some(Instant::now());
        debug!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            "LLM error recorded, delaying subsequent calls"
        );
    }

    /// Time left in the current cooldown window.
    pub fn cooldown_remaining(&self) -> Duration {
        match self.lock().last_error_at {
            Some(at) => self.cooldown.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleeps until the cooldown window has passed.
    pub async fn wait_for_cooldown(&self) {
        let remaining = self.cooldown_remaining();
        if !remaining.is_zero() {
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                "Waiting out LLM error cooldown"
            );
            tokio::time::sleep(remaining).await;
        }
    }

    /// Current backoff delay.
    pub fn backoff(&self) -> Duration {
        self.lock().backoff
    }

    /// Escalates the backoff after a rate-limited outcome and returns it.
    pub fn escalate(&self) -> Duration {
        let backoff = {
            let mut state = self.lock();
            state.backoff = if state.backoff.is_zero() {
                self.initial_backoff
            } else {
                (state.backoff * 2).min(self.max_backoff)
            };
            state.backoff
        };
        self.metrics.set_backoff(backoff);
        warn!(
            backoff_ms = backoff.as_millis() as u64,
            "Rate limit detected, raising backoff"
        );
        backoff
    }

    /// Waits out the pending backoff, if any, then decays it by one step.
    ///
    /// Returns the delay that was waited.
    pub async fn consume_backoff(&self) -> Duration {
        let delay = self.backoff();
        if delay.is_zero() {
            return Duration::ZERO;
        }

        info!(
            backoff_ms = delay.as_millis() as u64,
            "Rate limit backoff before next request"
        );
        tokio::time::sleep(delay).await;

        let remaining = {
            let mut state = self.lock();
            state.backoff = state.backoff.saturating_sub(self.backoff_decay);
            state.backoff
        };
        self.metrics.set_backoff(remaining);
        delay
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
