//! Executor configuration.
//!
//! Configuration is an explicit value handed to the executor at construction;
//! nothing is read from process-wide state after that.

use std::str::FromStr;
use std::time::Duration;

/// How enqueued jobs get executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Jobs are stored and picked up by workers (or `perform_ready`/`drain`).
    #[default]
    Queued,
    /// `enqueue` runs the whole lineage before returning, sleeping on the
    /// executor's clock between retries.
    Inline,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "inline" => Ok(Self::Inline),
            other => Err(format!("unknown execution mode `{other}` (expected queued|inline)")),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value `{value}` for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Job executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Name for logging and worker thread names
    pub name: String,
    /// Only run jobs from this queue (all queues when `None`)
    pub queue: Option<String>,
    /// How often idle workers poll for ready jobs
    pub poll_interval: Duration,
    /// Number of worker threads started by `spawn`
    pub workers: usize,
    pub mode: ExecutionMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "job-executor".to_string(),
            queue: None,
            poll_interval: Duration::from_millis(100),
            workers: 4,
            mode: ExecutionMode::Queued,
        }
    }
}

pub const ENV_WORKER_NAME: &str = "FORGEJOBS_WORKER_NAME";
pub const ENV_QUEUE: &str = "FORGEJOBS_QUEUE";
pub const ENV_POLL_INTERVAL_MS: &str = "FORGEJOBS_POLL_INTERVAL_MS";
pub const ENV_WORKERS: &str = "FORGEJOBS_WORKERS";
pub const ENV_EXECUTION_MODE: &str = "FORGEJOBS_EXECUTION_MODE";

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn inline() -> Self {
        Self::default().with_mode(ExecutionMode::Inline)
    }

    /// Load from `FORGEJOBS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (unset keys keep their defaults).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_WORKER_NAME).filter(|v| !v.trim().is_empty()) {
            config.name = name;
        }
        if let Some(queue) = lookup(ENV_QUEUE).filter(|v| !v.trim().is_empty()) {
            config.queue = Some(queue);
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms: u64 = parse(ENV_POLL_INTERVAL_MS, &raw)?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            let workers: usize = parse(ENV_WORKERS, &raw)?;
            if workers == 0 {
                return Err(ConfigError {
                    key: ENV_WORKERS,
                    value: raw,
                    reason: "at least one worker is required".to_string(),
                });
            }
            config.workers = workers;
        }
        if let Some(raw) = lookup(ENV_EXECUTION_MODE) {
            config.mode = parse(ENV_EXECUTION_MODE, &raw)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ExecutorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ExecutorConfig::default());
    }

    #[test]
    fn reads_every_key() {
        let config = ExecutorConfig::from_lookup(lookup(&[
            (ENV_WORKER_NAME, "mailer-worker"),
            (ENV_QUEUE, "mailers"),
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_WORKERS, "2"),
            (ENV_EXECUTION_MODE, "Inline"),
        ]))
        .unwrap();

        assert_eq!(config.name, "mailer-worker");
        assert_eq!(config.queue.as_deref(), Some("mailers"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.workers, 2);
        assert_eq!(config.mode, ExecutionMode::Inline);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = ExecutorConfig::from_lookup(lookup(&[(ENV_POLL_INTERVAL_MS, "soon")])).unwrap_err();
        assert_eq!(err.key, ENV_POLL_INTERVAL_MS);
        assert_eq!(err.value, "soon");
    }

    #[test]
    fn rejects_zero_workers_and_unknown_modes() {
        let err = ExecutorConfig::from_lookup(lookup(&[(ENV_WORKERS, "0")])).unwrap_err();
        assert_eq!(err.key, ENV_WORKERS);

        let err = ExecutorConfig::from_lookup(lookup(&[(ENV_EXECUTION_MODE, "async")])).unwrap_err();
        assert!(err.reason.contains("unknown execution mode"));
    }
}
