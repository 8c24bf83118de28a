use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use melodia_core::backoff::BackoffConfig;
use melodia_core::error::CoreError;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity recorded on claimed jobs. Pool workers append `-<n>`.
    pub worker_id: String,
    /// Number of concurrent workers in the pool (default: `1`).
    pub concurrency: usize,
    /// Lease granted per claim and per renewal (default: 60 s).
    pub lease_duration: Duration,
    /// How often a running job's lease is renewed (default: lease / 3).
    pub heartbeat_interval: Duration,
    /// Upper bound on a single lease renewal (default: heartbeat / 2).
    pub renew_timeout: Duration,
    /// Sleep schedule when the queue is empty.
    pub idle_backoff: BackoffConfig,
    /// Upper bound on a single artifact fetch (default: 30 s).
    pub fetch_timeout: Duration,
    /// Fetch attempts per artifact before giving up (default: `3`).
    pub fetch_attempts: u32,
    /// Delay schedule between fetch attempts.
    pub fetch_backoff: BackoffConfig,
    /// Attempt number at which a transient failure becomes terminal
    /// (default: `5`).
    pub max_attempts: i32,
    /// Artifacts every job needs (model weights, tokenizer, ...).
    pub model_artifacts: Vec<String>,
    /// Local artifact cache directory (default: `./data/cache`).
    pub cache_dir: PathBuf,
    /// Extension of published outputs (default: `wav`).
    pub output_extension: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let lease_duration = Duration::from_secs(60);
        Self {
            worker_id: default_worker_id(),
            concurrency: 1,
            lease_duration,
            heartbeat_interval: lease_duration / 3,
            renew_timeout: lease_duration / 6,
            idle_backoff: BackoffConfig::new(Duration::from_millis(250), Duration::from_secs(5)),
            fetch_timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            fetch_backoff: BackoffConfig::new(Duration::from_millis(500), Duration::from_secs(5)),
            max_attempts: 5,
            model_artifacts: Vec::new(),
            cache_dir: PathBuf::from("./data/cache"),
            output_extension: "wav".to_string(),
        }
    }
}

fn default_worker_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &suffix[..8])
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default          |
    /// |---------------------------------|------------------|
    /// | `WORKER_ID`                     | `worker-<rand>`  |
    /// | `WORKER_CONCURRENCY`            | `1`              |
    /// | `WORKER_LEASE_SECS`             | `60`             |
    /// | `WORKER_HEARTBEAT_SECS`         | lease / 3        |
    /// | `WORKER_RENEW_TIMEOUT_SECS`     | heartbeat / 2    |
    /// | `WORKER_IDLE_BACKOFF_MS`        | `250`            |
    /// | `WORKER_IDLE_BACKOFF_MAX_MS`    | `5000`           |
    /// | `ARTIFACT_FETCH_TIMEOUT_SECS`   | `30`             |
    /// | `ARTIFACT_FETCH_ATTEMPTS`       | `3`              |
    /// | `WORKER_MAX_ATTEMPTS`           | `5`              |
    /// | `MODEL_ARTIFACTS`               | empty (comma-separated names) |
    /// | `ARTIFACT_CACHE_DIR`            | `./data/cache`   |
    /// | `OUTPUT_EXTENSION`              | `wav`            |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let lease_duration = Duration::from_secs(parse_or(&var, "WORKER_LEASE_SECS", 60u64)?);
        let heartbeat_interval = match var("WORKER_HEARTBEAT_SECS") {
            Some(_) => Duration::from_secs(parse_or(&var, "WORKER_HEARTBEAT_SECS", 0u64)?),
            None => lease_duration / 3,
        };
        let renew_timeout = match var("WORKER_RENEW_TIMEOUT_SECS") {
            Some(_) => Duration::from_secs(parse_or(&var, "WORKER_RENEW_TIMEOUT_SECS", 0u64)?),
            None => heartbeat_interval / 2,
        };

        let config = Self {
            worker_id: var("WORKER_ID").unwrap_or(defaults.worker_id),
            concurrency: parse_or(&var, "WORKER_CONCURRENCY", defaults.concurrency)?,
            lease_duration,
            heartbeat_interval,
            renew_timeout,
            idle_backoff: BackoffConfig::new(
                Duration::from_millis(parse_or(&var, "WORKER_IDLE_BACKOFF_MS", 250u64)?),
                Duration::from_millis(parse_or(&var, "WORKER_IDLE_BACKOFF_MAX_MS", 5000u64)?),
            ),
            fetch_timeout: Duration::from_secs(parse_or(
                &var,
                "ARTIFACT_FETCH_TIMEOUT_SECS",
                30u64,
            )?),
            fetch_attempts: parse_or(&var, "ARTIFACT_FETCH_ATTEMPTS", defaults.fetch_attempts)?,
            fetch_backoff: defaults.fetch_backoff,
            max_attempts: parse_or(&var, "WORKER_MAX_ATTEMPTS", defaults.max_attempts)?,
            model_artifacts: var("MODEL_ARTIFACTS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            cache_dir: var("ARTIFACT_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            output_extension: var("OUTPUT_EXTENSION").unwrap_or(defaults.output_extension),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which leases could not be kept alive.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.lease_duration.is_zero() {
            return Err(CoreError::Validation(
                "Lease duration must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lease_duration {
            return Err(CoreError::Validation(format!(
                "Heartbeat interval ({:?}) must be positive and shorter than the lease ({:?})",
                self.heartbeat_interval, self.lease_duration
            )));
        }
        if self.renew_timeout.is_zero() || self.renew_timeout >= self.lease_duration {
            return Err(CoreError::Validation(format!(
                "Renew timeout ({:?}) must be positive and shorter than the lease ({:?})",
                self.renew_timeout, self.lease_duration
            )));
        }
        if self.idle_backoff.initial_delay.is_zero()
            || self.idle_backoff.max_delay < self.idle_backoff.initial_delay
        {
            return Err(CoreError::Validation(format!(
                "Idle backoff must start above zero and not exceed its maximum ({:?} .. {:?})",
                self.idle_backoff.initial_delay, self.idle_backoff.max_delay
            )));
        }
        if self.concurrency == 0 || self.fetch_attempts == 0 || self.max_attempts < 1 {
            return Err(CoreError::Validation(
                "Concurrency, fetch attempts and max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError>
where
    T: FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}
