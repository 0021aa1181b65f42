//! Engine configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Tuning knobs for the evaluation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // Concurrency
    /// Upper bound of concurrent model requests for the whole process.
    pub max_concurrent_requests: usize,
    /// Share of `max_concurrent_requests` a single evaluation may use.
    pub concurrency_ratio: f64,

    // Retry and throttling
    /// Attempts per message, including the first one.
    pub retry_attempts: u32,
    /// Delay between attempts for the same message.
    pub retry_delay: Duration,
    /// Window after any model failure during which new calls wait.
    pub error_cooldown: Duration,
    /// First rate-limit backoff delay.
    pub initial_backoff: Duration,
    /// Cap for the rate-limit backoff delay.
    pub max_backoff: Duration,
    /// Amount the backoff shrinks each time it is consumed.
    pub backoff_decay: Duration,

    // Timeouts and liveness
    /// Hard deadline for one model invocation.
    pub llm_timeout: Duration,
    /// Maximum wall-clock duration of a run.
    pub evaluation_timeout: Duration,
    /// Heartbeat age after which a running evaluation is considered stuck.
    pub stale_heartbeat: Duration,
    /// Interval of the background heartbeat while a pass is alive.
    pub heartbeat_interval: Duration,

    // Progress and events
    /// Completions between progress flushes.
    pub progress_batch_size: usize,
    /// Per-subscriber event buffer.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            concurrency_ratio: 0.8,

            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            error_cooldown: Duration::from_millis(5000),
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(60_000),
            backoff_decay: Duration::from_millis(100),

            llm_timeout: Duration::from_millis(300_000),
            evaluation_timeout: Duration::from_secs(2 * 3600),
            stale_heartbeat: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60),

            progress_batch_size: 10,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MAX_CONCURRENT_LLM_REQUESTS`: Process-wide request limit (default: 5)
    /// - `EVALUATION_CONCURRENCY_RATIO`: Share used by one evaluation (default: 0.8)
    /// - `LLM_REQUEST_RETRY_ATTEMPTS`: Attempts per message (default: 3)
    /// - `LLM_REQUEST_RETRY_DELAY_MS`: Delay between attempts (default: 500)
    /// - `LLM_ERROR_DELAY_MS`: Cooldown after a model failure (default: 5000)
    /// - `LLM_TIMEOUT_MS`: Per-invocation deadline (default: 300000)
    /// - `EVALUATION_TIMEOUT_HOURS`: Run deadline (default: 2)
    /// - `EVALUATION_STALE_HEARTBEAT_MINUTES`: Stuck threshold (default: 5)
    /// - `EVALUATION_HEARTBEAT_INTERVAL_SECS`: Background heartbeat (default: 60)
    /// - `EVALUATION_PROGRESS_BATCH_SIZE`: Completions per flush (default: 10)
    /// - `EVALUATION_EVENT_BUFFER`: Per-subscriber buffer (default: 256)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MAX_CONCURRENT_LLM_REQUESTS") {
            config.max_concurrent_requests = parse_env_value(&val, "MAX_CONCURRENT_LLM_REQUESTS")?;
        }

        if let Ok(val) = std::env::var("EVALUATION_CONCURRENCY_RATIO") {
            config.concurrency_ratio = parse_env_value(&val, "EVALUATION_CONCURRENCY_RATIO")?;
        }

        if let Ok(val) = std::env::var("LLM_REQUEST_RETRY_ATTEMPTS") {
            config.retry_attempts = parse_env_value(&val, "LLM_REQUEST_RETRY_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("LLM_REQUEST_RETRY_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "LLM_REQUEST_RETRY_DELAY_MS")?;
            config.retry_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("LLM_ERROR_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "LLM_ERROR_DELAY_MS")?;
            config.error_cooldown = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("LLM_TIMEOUT_MS") {
            let ms: u64 = parse_env_value(&val, "LLM_TIMEOUT_MS")?;
            config.llm_timeout = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("EVALUATION_TIMEOUT_HOURS") {
            let hours: f64 = parse_env_value(&val, "EVALUATION_TIMEOUT_HOURS")?;
            if !hours.is_finite() || hours <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "EVALUATION_TIMEOUT_HOURS".to_string(),
                    message: format!("expected a positive number of hours, got '{}'", val),
                });
            }
            config.evaluation_timeout = Duration::from_secs_f64(hours * 3600.0);
        }

        if let Ok(val) = std::env::var("EVALUATION_STALE_HEARTBEAT_MINUTES") {
            let minutes: u64 = parse_env_value(&val, "EVALUATION_STALE_HEARTBEAT_MINUTES")?;
            config.stale_heartbeat = Duration::from_secs(minutes * 60);
        }

        if let Ok(val) = std::env::var("EVALUATION_HEARTBEAT_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "EVALUATION_HEARTBEAT_INTERVAL_SECS")?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("EVALUATION_PROGRESS_BATCH_SIZE") {
            config.progress_batch_size = parse_env_value(&val, "EVALUATION_PROGRESS_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("EVALUATION_EVENT_BUFFER") {
            config.event_buffer = parse_env_value(&val, "EVALUATION_EVENT_BUFFER")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_requests must be greater than 0".to_string(),
            ));
        }

        if !(self.concurrency_ratio > 0.0 && self.concurrency_ratio <= 1.0) {
            return Err(ConfigError::ValidationFailed(
                "concurrency_ratio must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.llm_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "llm_timeout must be greater than 0".to_string(),
            ));
        }

        if self.evaluation_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "evaluation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::ValidationFailed(
                "initial_backoff cannot exceed max_backoff".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        if self.progress_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of in-flight model calls one evaluation pass may hold.
    pub fn effective_concurrency(&self) -> usize {
        ((self.max_concurrent_requests as f64 * self.concurrency_ratio).floor() as usize).max(1)
    }

    /// Builder method to set the process-wide request limit.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Builder method to set the concurrency ratio.
    pub fn with_concurrency_ratio(mut self, ratio: f64) -> Self {
        self.concurrency_ratio = ratio;
        self
    }

    /// Builder method to set attempts per message.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Builder method to set the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builder method to set the failure cooldown window.
    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    /// Builder method to set the per-invocation deadline.
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Builder method to set the run deadline.
    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Builder method to set the stuck threshold.
    pub fn with_stale_heartbeat(mut self, threshold: Duration) -> Self {
        self.stale_heartbeat = threshold;
        self
    }

    /// Builder method to set the background heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builder method to set completions per progress flush.
    pub fn with_progress_batch_size(mut self, size: usize) -> Self {
        self.progress_batch_size = size;
        self
    }

    /// Builder method to set the rate-limit backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, decay: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_decay = decay;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
