use std::time::Duration;

use underwrite_core::config::RetryConfig;
use underwrite_core::error::UnderwriteError;

/// Decides whether a failed capability call is attempted again.
pub trait RetryPolicy: Send + Sync + 'static {
    /// Backoff before the next attempt, or `None` to give up.
    ///
    /// `attempt` counts from 0 for the first failure.
    fn next_backoff(&self, capability: &str, attempt: u32, error: &UnderwriteError) -> Option<Duration>;
}

/// Never retry. Capabilities are not assumed idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_backoff(&self, _: &str, _: u32, _: &UnderwriteError) -> Option<Duration> {
        None
    }
}

/// Exponential backoff with jitter, for an allow-list of capabilities and
/// retryable errors only.
#[derive(Debug, Clone)]
pub struct BackoffRetry {
    config: RetryConfig,
}

impl BackoffRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryPolicy for BackoffRetry {
    fn next_backoff(&self, capability: &str, attempt: u32, error: &UnderwriteError) -> Option<Duration> {
        if attempt >= self.config.max_retries || !error.is_retryable() {
            return None;
        }
        if !self.config.capabilities.iter().any(|c| c == capability) {
            return None;
        }
        Some(calculate_backoff(attempt, &self.config))
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
