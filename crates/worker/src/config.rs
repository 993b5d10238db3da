use std::time::Duration;

use carlitos_pipeline::config::{parse_or, process_env, AnalysisConfig, ConfigError, Lookup};

/// Worker pool settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent consumers (default: `2`).
    pub concurrency: usize,
    /// Idle wait between empty queue polls (default: 1 second).
    pub poll_interval: Duration,
    /// Retry budget and lease per analysis attempt.
    pub analysis: AnalysisConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(1000),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `WORKER_CONCURRENCY`     | `2`     |
    /// | `QUEUE_POLL_INTERVAL_MS` | `1000`  |
    ///
    /// plus the variables read by [`AnalysisConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Lookup) -> Result<Self, ConfigError> {
        let concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 2)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let poll_ms: u64 = parse_or(&lookup, "QUEUE_POLL_INTERVAL_MS", 1000)?;

        Ok(Self {
            concurrency,
            poll_interval: Duration::from_millis(poll_ms),
            analysis: AnalysisConfig::from_lookup(&lookup)?,
        })
    }
}
