//! Proxy configuration, read from the container environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use invoker_core::invoker::DEFAULT_MAX_TIMEOUT_SECONDS;
use invoker_core::{RetryPolicy, SandboxConfig, SchedulerConfig};
use thiserror::Error;

use crate::observability::LogFormat;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// When the result is persisted relative to the HTTP response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportingMode {
    /// Respond after the result is stored.
    #[default]
    Sync,
    /// Respond 202 on admission, store the result in the background.
    Async,
}

impl FromStr for ReportingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(ReportingMode::Sync),
            "async" => Ok(ReportingMode::Async),
            _ => Err("expected `sync` or `async`".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub port: u16,
    pub concurrency: usize,
    pub max_queue_depth: usize,
    pub storage_root: PathBuf,
    pub work_root: PathBuf,
    pub reporting_mode: ReportingMode,
    pub storage_retry_base: Duration,
    pub storage_max_attempts: u32,
    pub max_timeout_seconds: u64,
    pub max_log_bytes: usize,
    pub kill_grace: Duration,
    pub log_format: LogFormat,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let container_mb: Option<u64> = optional(&lookup, "PROXY_CONTAINER_MEMORY_MB")?;
        let job_mb: Option<u64> = optional(&lookup, "PROXY_JOB_MEMORY_MB")?;
        let concurrency = match optional::<usize>(&lookup, "PROXY_CONCURRENCY")? {
            Some(n) => positive("PROXY_CONCURRENCY", n)?,
            None => default_concurrency(num_cpus::get(), container_mb, job_mb),
        };

        Ok(Self {
            port: or_default(&lookup, "PORT", 8080)?,
            concurrency,
            max_queue_depth: or_default(&lookup, "PROXY_MAX_QUEUE_DEPTH", 256)?,
            storage_root: or_default(
                &lookup,
                "PROXY_STORAGE_ROOT",
                PathBuf::from("/var/lib/invoker/store"),
            )?,
            work_root: or_default(&lookup, "PROXY_WORK_ROOT", std::env::temp_dir())?,
            reporting_mode: or_default(&lookup, "PROXY_REPORTING_MODE", ReportingMode::Sync)?,
            storage_retry_base: Duration::from_millis(or_default(
                &lookup,
                "PROXY_STORAGE_RETRY_BASE_MS",
                100,
            )?),
            storage_max_attempts: positive(
                "PROXY_STORAGE_MAX_ATTEMPTS",
                or_default(&lookup, "PROXY_STORAGE_MAX_ATTEMPTS", 3)?,
            )?,
            max_timeout_seconds: positive(
                "PROXY_MAX_TIMEOUT_SECONDS",
                or_default(&lookup, "PROXY_MAX_TIMEOUT_SECONDS", DEFAULT_MAX_TIMEOUT_SECONDS)?,
            )?,
            max_log_bytes: or_default(&lookup, "PROXY_MAX_LOG_BYTES", 1024 * 1024)?,
            kill_grace: Duration::from_millis(or_default(&lookup, "PROXY_KILL_GRACE_MS", 2000)?),
            log_format: or_default(&lookup, "PROXY_LOG_FORMAT", LogFormat::Json)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.storage_max_attempts,
            ..RetryPolicy::storage(self.storage_retry_base)
        }
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            work_root: self.work_root.clone(),
            max_log_bytes: self.max_log_bytes,
            kill_grace: self.kill_grace,
            ..SandboxConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            slots: self.concurrency,
            max_queue_depth: self.max_queue_depth,
        }
    }
}

/// CPU count, bounded by how many jobs fit in the container's memory.
pub fn default_concurrency(cpus: usize, container_mb: Option<u64>, job_mb: Option<u64>) -> usize {
    let cpus = cpus.max(1);
    match (container_mb, job_mb) {
        (Some(container), Some(job)) if job > 0 => {
            let fit = usize::try_from(container / job).unwrap_or(usize::MAX);
            cpus.min(fit).max(1)
        }
        _ => cpus,
    }
}

fn optional<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(optional(lookup, var)?.unwrap_or(default))
}

fn positive<T>(var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Default + PartialEq + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ProxyConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProxyConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config(&[]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.concurrency, num_cpus::get().max(1));
        assert_eq!(config.max_queue_depth, 256);
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/invoker/store"));
        assert_eq!(config.reporting_mode, ReportingMode::Sync);
        assert_eq!(config.storage_max_attempts, 3);
        assert_eq!(config.max_timeout_seconds, 900);
        assert_eq!(config.max_log_bytes, 1024 * 1024);
        assert_eq!(config.kill_grace, Duration::from_secs(2));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("PORT", "9000"),
            ("PROXY_CONCURRENCY", "3"),
            ("PROXY_MAX_QUEUE_DEPTH", "10"),
            ("PROXY_REPORTING_MODE", "ASYNC"),
            ("PROXY_STORAGE_RETRY_BASE_MS", "25"),
            ("PROXY_STORAGE_MAX_ATTEMPTS", "5"),
            ("PROXY_LOG_FORMAT", "pretty"),
            ("PROXY_WORK_ROOT", "/scratch"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.reporting_mode, ReportingMode::Async);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.work_root, PathBuf::from("/scratch"));

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.slots, 3);
        assert_eq!(scheduler.max_queue_depth, 10);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(25));
        assert_eq!(retry.multiplier, 2.0);
    }

    #[rstest]
    #[case("PORT", "eighty")]
    #[case("PORT", "70000")]
    #[case("PROXY_CONCURRENCY", "0")]
    #[case("PROXY_CONCURRENCY", "-2")]
    #[case("PROXY_REPORTING_MODE", "eventually")]
    #[case("PROXY_STORAGE_MAX_ATTEMPTS", "0")]
    #[case("PROXY_MAX_TIMEOUT_SECONDS", "0")]
    #[case("PROXY_LOG_FORMAT", "xml")]
    fn invalid_values_name_the_variable(#[case] var: &'static str, #[case] value: &str) {
        let err = config(&[(var, value)]).unwrap_err();
        assert_eq!(err.var, var);
        assert_eq!(err.value, value);
    }

    #[rstest]
    #[case(8, None, None, 8)]
    #[case(8, Some(4096), Some(1024), 4)]
    #[case(2, Some(4096), Some(256), 2)]
    #[case(8, Some(512), Some(1024), 1)]
    #[case(0, None, None, 1)]
    #[case(4, Some(4096), Some(0), 4)]
    fn concurrency_is_bounded_by_memory(
        #[case] cpus: usize,
        #[case] container_mb: Option<u64>,
        #[case] job_mb: Option<u64>,
        #[case] expected: usize,
    ) {
        assert_eq!(default_concurrency(cpus, container_mb, job_mb), expected);
    }

    #[test]
    fn memory_budget_feeds_the_default() {
        let config = config(&[
            ("PROXY_CONTAINER_MEMORY_MB", "1024"),
            ("PROXY_JOB_MEMORY_MB", "1024"),
        ])
        .unwrap();
        assert_eq!(config.concurrency, 1);
    }
}
