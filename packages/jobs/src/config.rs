//! Runtime configuration read from the environment.

use std::time::Duration;

use storage::SnapshotConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}={value}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Snapshot(#[from] storage::SnapshotError),
}

/// What `submit_job` does when every worker slot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverloadPolicy {
    /// Report the submission as not accepted.
    #[default]
    Reject,
    /// Run the job synchronously on the caller instead.
    RunInline,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard ceiling of concurrently executing jobs.
    pub max_workers: usize,
    /// Run every job on the submitting task instead of a worker.
    pub synchronous: bool,
    pub overload: OverloadPolicy,
    /// The log sink requests a snapshot after every N appended lines of a job.
    pub persist_every: usize,
    pub snapshot: SnapshotConfig,
    pub stream_poll_interval: Duration,
    pub housekeeping_interval: Duration,
    /// Terminal jobs older than this are purged by housekeeping.
    pub retention: Option<Duration>,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            synchronous: false,
            overload: OverloadPolicy::Reject,
            persist_every: 5,
            snapshot: SnapshotConfig::default(),
            stream_poll_interval: Duration::from_secs(1),
            housekeeping_interval: Duration::from_secs(30),
            retention: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Config for tests and tools: snapshots under `dir`, defaults otherwise.
    pub fn with_snapshot_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            snapshot: SnapshotConfig::in_dir(dir),
            ..Default::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_overload(mut self, overload: OverloadPolicy) -> Self {
        self.overload = overload;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval = interval;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `MAX_WORKERS` (default: 4, at least 1)
    /// - `SYNCHRONOUS_JOBS` (`true`/`false`, default: false)
    /// - `OVERLOAD_POLICY` (`reject`/`inline`, default: reject)
    /// - `LOG_PERSIST_EVERY` (default: 5)
    /// - `STREAM_POLL_MS` (default: 1000)
    /// - `HOUSEKEEPING_SECS` (default: 30)
    /// - `JOB_RETENTION_HOURS` (optional)
    /// - `SHUTDOWN_GRACE_SECS` (default: 30)
    /// - snapshot variables, see [`SnapshotConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading runtime variables through `lookup`.
    /// Snapshot variables always come from the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let vars = Vars(lookup);

        let max_workers = vars.parse::<usize>("MAX_WORKERS")?.unwrap_or(defaults.max_workers);
        if max_workers == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_WORKERS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let overload = match vars.value("OVERLOAD_POLICY").as_deref() {
            None | Some("reject") => OverloadPolicy::Reject,
            Some("inline") => OverloadPolicy::RunInline,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "OVERLOAD_POLICY",
                    value: other.to_string(),
                    reason: "expected reject|inline".into(),
                });
            }
        };

        let persist_every = vars
            .parse::<usize>("LOG_PERSIST_EVERY")?
            .unwrap_or(defaults.persist_every);

        let retention = match vars.parse::<u64>("JOB_RETENTION_HOURS")? {
            Some(hours) => Some(retention_from_hours(hours)?),
            None => None,
        };

        Ok(Self {
            max_workers,
            synchronous: vars.parse_bool("SYNCHRONOUS_JOBS")?.unwrap_or(defaults.synchronous),
            overload,
            persist_every: persist_every.max(1),
            snapshot: SnapshotConfig::from_env()?,
            stream_poll_interval: vars
                .parse::<u64>("STREAM_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.stream_poll_interval),
            housekeeping_interval: vars
                .parse::<u64>("HOUSEKEEPING_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.housekeeping_interval),
            retention,
            shutdown_grace: vars
                .parse::<u64>("SHUTDOWN_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
        })
    }
}

/// Retention in hours as a duration that chrono can subtract from a timestamp.
fn retention_from_hours(hours: u64) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "JOB_RETENTION_HOURS",
        value: hours.to_string(),
        reason: "retention is too large".into(),
    };
    let retention = hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(invalid)?;
    chrono::Duration::from_std(retention).map_err(|_| invalid())?;
    Ok(retention)
}

struct Vars<L>(L);

impl<L: Fn(&str) -> Option<String>> Vars<L> {
    fn value(&self, var: &str) -> Option<String> {
        let v = (self.0)(var)?;
        let trimmed = v.trim().to_ascii_lowercase();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.value(var) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                value,
                reason: e.to_string(),
            })
    }

    fn parse_bool(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.value(var) else {
            return Ok(None);
        };
        match value.as_str() {
            "1" | "true" | "yes" | "y" => Ok(Some(true)),
            "0" | "false" | "no" | "n" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected true/false".into(),
            }),
        }
    }
}
