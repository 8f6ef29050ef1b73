//! Runner configuration from environment variables.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of worker tasks pulling from the queue.
    pub workers: usize,
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    /// Base delay before the second attempt; doubles per retry.
    pub backoff: Duration,
    pub attempt_timeout: Duration,
    /// Processing ceiling enforced by the sweep.
    pub job_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(60),
            job_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            workers: env_parse("GEOJOB_WORKERS").unwrap_or(d.workers).max(1),
            max_attempts: env_parse("GEOJOB_MAX_ATTEMPTS")
                .unwrap_or(d.max_attempts)
                .max(1),
            backoff: env_parse("GEOJOB_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.backoff),
            attempt_timeout: env_parse("GEOJOB_ATTEMPT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.attempt_timeout),
            job_timeout: env_parse("GEOJOB_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.job_timeout),
            sweep_interval: env_parse("GEOJOB_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before retrying after failed attempt number `attempt` (1-based).
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
