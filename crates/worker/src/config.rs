use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default pause after a failed queue access before the next tick.
pub const DEFAULT_QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Settings that drive the admission loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently running jobs.
    pub capacity: usize,
    /// Bounded wait for both a free slot and a queue entry per tick.
    pub poll_interval: Duration,
    /// Quiet period (no admissions, no active slots) before idle reclaim.
    pub idle_timeout: Duration,
    /// How long shutdown waits for active slots before abandoning them.
    pub drain_timeout: Duration,
    /// Pause after a failed queue access.
    pub queue_error_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            poll_interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(30),
            queue_error_backoff: DEFAULT_QUEUE_ERROR_BACKOFF,
        }
    }
}

/// Defaults applied by the job executor.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Pause between scrolls when a payload has no action list.
    pub scroll_interval: Duration,
    /// Total scrolling time when a payload has no action list.
    pub visit_duration: Duration,
    /// Hard deadline for a whole job. `None` disables it.
    pub timeout: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            scroll_interval: Duration::from_secs(3),
            visit_duration: Duration::from_secs(60),
            timeout: None,
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// All fields except `DATABASE_URL` have defaults matching the
/// deployments this worker replaces.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub dispatcher: DispatcherConfig,
    pub job: JobConfig,
    pub stats_interval: Duration,
    /// Write stats snapshots here instead of logging them.
    pub stats_file: Option<PathBuf>,
    pub database_url: String,
    pub task_queue_key: String,
    pub result_queue_key: String,
    /// Optional HTTP endpoint every result is POSTed to.
    pub result_callback_url: Option<String>,
    pub webdriver_url: String,
    pub chrome_max_memory: String,
    /// Process command-line pattern killed during idle reclaim.
    pub reclaim_process_pattern: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `DATABASE_URL`            | required                  |
    /// | `MAX_CONCURRENT_TASKS`    | `3`                       |
    /// | `POLL_INTERVAL_MS`        | `1000`                    |
    /// | `SCROLL_INTERVAL_SECS`    | `3.0`                     |
    /// | `TASK_DURATION_SECS`      | `60`                      |
    /// | `TASK_TIMEOUT_SECS`       | unset (no timeout)        |
    /// | `IDLE_TIMEOUT_SECS`       | `300`                     |
    /// | `STATS_INTERVAL_SECS`     | `30`                      |
    /// | `DRAIN_TIMEOUT_SECS`      | `30`                      |
    /// | `TASK_QUEUE_KEY`          | `headless_chrome_tasks`   |
    /// | `RESULT_QUEUE_KEY`        | `headless_chrome_results` |
    /// | `RESULT_CALLBACK_URL`     | unset                     |
    /// | `WEBDRIVER_URL`           | `http://localhost:9515`   |
    /// | `CHROME_MAX_MEMORY`       | `1GB`                     |
    /// | `STATS_FILE`              | unset (log snapshots)     |
    /// | `RECLAIM_PROCESS_PATTERN` | unset (no process scan)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let capacity: usize = env.parse("MAX_CONCURRENT_TASKS", 3, "a positive integer")?;
        if capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_CONCURRENT_TASKS",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let poll_ms: u64 = env.parse("POLL_INTERVAL_MS", 1000, "a positive integer")?;
        if poll_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let scroll_interval = env.secs_f64("SCROLL_INTERVAL_SECS", 3.0)?;
        let visit_duration = Duration::from_secs(env.parse(
            "TASK_DURATION_SECS",
            60,
            "a whole number of seconds",
        )?);
        let timeout = match env.get("TASK_TIMEOUT_SECS") {
            Some(_) => {
                let secs: u64 = env.parse("TASK_TIMEOUT_SECS", 0, "a whole number of seconds")?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let idle_timeout = Duration::from_secs(env.parse(
            "IDLE_TIMEOUT_SECS",
            300,
            "a whole number of seconds",
        )?);
        let drain_timeout = Duration::from_secs(env.parse(
            "DRAIN_TIMEOUT_SECS",
            30,
            "a whole number of seconds",
        )?);
        let stats_secs: u64 = env.parse("STATS_INTERVAL_SECS", 30, "a positive integer")?;
        if stats_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "STATS_INTERVAL_SECS",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let database_url = env
            .get("DATABASE_URL")
            .ok_or(ConfigError::Missing { var: "DATABASE_URL" })?;

        Ok(Self {
            dispatcher: DispatcherConfig {
                capacity,
                poll_interval: Duration::from_millis(poll_ms),
                idle_timeout,
                drain_timeout,
                queue_error_backoff: DEFAULT_QUEUE_ERROR_BACKOFF,
            },
            job: JobConfig {
                scroll_interval,
                visit_duration,
                timeout,
            },
            stats_interval: Duration::from_secs(stats_secs),
            stats_file: env.get("STATS_FILE").map(PathBuf::from),
            database_url,
            task_queue_key: env.string("TASK_QUEUE_KEY", "headless_chrome_tasks"),
            result_queue_key: env.string("RESULT_QUEUE_KEY", "headless_chrome_results"),
            result_callback_url: env.get("RESULT_CALLBACK_URL"),
            webdriver_url: env.string("WEBDRIVER_URL", "http://localhost:9515"),
            chrome_max_memory: env.string("CHROME_MAX_MEMORY", "1GB"),
            reclaim_process_pattern: env.get("RECLAIM_PROCESS_PATTERN"),
        })
    }
}

/// Thin accessor over a lookup function. Blank values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            }),
            None => Ok(default),
        }
    }

    fn secs_f64(&self, var: &'static str, default: f64) -> Result<Duration, ConfigError> {
        let secs: f64 = self.parse(var, default, "a positive number of seconds")?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::Invalid {
                var,
                value: secs.to_string(),
                expected: "a positive number of seconds",
            });
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/q")]).unwrap();

        assert_eq!(config.dispatcher.capacity, 3);
        assert_eq!(config.dispatcher.poll_interval, Duration::from_secs(1));
        assert_eq!(config.dispatcher.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.dispatcher.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.job.scroll_interval, Duration::from_secs(3));
        assert_eq!(config.job.visit_duration, Duration::from_secs(60));
        assert_eq!(config.job.timeout, None);
        assert_eq!(config.stats_interval, Duration::from_secs(30));
        assert_eq!(config.task_queue_key, "headless_chrome_tasks");
        assert_eq!(config.result_queue_key, "headless_chrome_results");
        assert_eq!(config.webdriver_url, "http://localhost:9515");
        assert_eq!(config.chrome_max_memory, "1GB");
        assert!(config.result_callback_url.is_none());
        assert!(config.stats_file.is_none());
        assert!(config.reclaim_process_pattern.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/q"),
            ("MAX_CONCURRENT_TASKS", "8"),
            ("POLL_INTERVAL_MS", "250"),
            ("SCROLL_INTERVAL_SECS", "0.5"),
            ("TASK_TIMEOUT_SECS", "90"),
            ("RESULT_CALLBACK_URL", "https://hooks.example.com/r"),
            ("STATS_FILE", "/tmp/stats.json"),
        ])
        .unwrap();

        assert_eq!(config.dispatcher.capacity, 8);
        assert_eq!(config.dispatcher.poll_interval, Duration::from_millis(250));
        assert_eq!(config.job.scroll_interval, Duration::from_millis(500));
        assert_eq!(config.job.timeout, Some(Duration::from_secs(90)));
        assert_eq!(
            config.result_callback_url.as_deref(),
            Some("https://hooks.example.com/r")
        );
        assert_eq!(config.stats_file, Some(PathBuf::from("/tmp/stats.json")));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/q"),
            ("TASK_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.job.timeout, None);
    }

    #[test]
    fn missing_database_url_is_reported() {
        assert_matches!(
            load(&[]),
            Err(ConfigError::Missing { var: "DATABASE_URL" })
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_matches!(
            load(&[
                ("DATABASE_URL", "postgres://localhost/q"),
                ("MAX_CONCURRENT_TASKS", "0"),
            ]),
            Err(ConfigError::Invalid { var: "MAX_CONCURRENT_TASKS", .. })
        );
    }

    #[test]
    fn garbage_number_is_rejected() {
        assert_matches!(
            load(&[
                ("DATABASE_URL", "postgres://localhost/q"),
                ("IDLE_TIMEOUT_SECS", "soon"),
            ]),
            Err(ConfigError::Invalid { var: "IDLE_TIMEOUT_SECS", value, .. }) if value == "soon"
        );
    }

    #[test]
    fn non_positive_scroll_interval_is_rejected() {
        assert_matches!(
            load(&[
                ("DATABASE_URL", "postgres://localhost/q"),
                ("SCROLL_INTERVAL_SECS", "-1"),
            ]),
            Err(ConfigError::Invalid { var: "SCROLL_INTERVAL_SECS", .. })
        );
    }
}
