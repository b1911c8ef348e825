//! Controller configuration from environment variables.

use crate::backoff::RetryPolicy;
use crate::error::ControllerError;
use crate::job::ShellSettings;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ControllerError::InvalidConfig(format!(
                "LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Runtime settings for the Build controller
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Maximum concurrent reconciles per controller
    pub worker_concurrency: u16,
    /// Only Builds labelled with this watch-filter value are reconciled
    pub worker_name: Option<String>,
    /// Log output format
    pub log_format: LogFormat,
    /// Where and how provisioner Jobs run
    pub shell: ShellSettings,
    /// Backoff for failed passes
    pub retry: RetryPolicy,
}

fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ControllerError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{key} has invalid value '{raw}'"))
        }),
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, treating empty values as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let worker_concurrency: u16 = parse("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"), 10)?;
        if worker_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        let defaults = ShellSettings::default();
        let shell = ShellSettings {
            namespace: get("SHELL_JOB_NAMESPACE").unwrap_or(defaults.namespace),
            image: get("SHELL_PROVISIONER_IMAGE").unwrap_or(defaults.image),
        };

        let base: u64 = parse("RETRY_BASE_DELAY_SECS", get("RETRY_BASE_DELAY_SECS"), 5)?;
        let max: u64 = parse("RETRY_MAX_DELAY_SECS", get("RETRY_MAX_DELAY_SECS"), 300)?;

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            worker_concurrency,
            worker_name: get("WORKER_NAME"),
            log_format,
            shell,
            retry: RetryPolicy::new(Duration::from_secs(base), Duration::from_secs(max)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.worker_concurrency, 10);
        assert_eq!(settings.log_format, LogFormat::Text);
        assert_eq!(settings.shell.namespace, "forge-core");
        assert_eq!(settings.shell.image, "ghcr.io/forge-build/forge-provisioner-shell:dev");
        assert!(settings.watch_namespace.is_none());
        assert!(settings.worker_name.is_none());
        assert_eq!(settings.retry, RetryPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("WATCH_NAMESPACE", "builds"),
            ("WORKER_CONCURRENCY", "3"),
            ("WORKER_NAME", "shard-a"),
            ("LOG_FORMAT", "JSON"),
            ("SHELL_JOB_NAMESPACE", "forge-jobs"),
        ])
        .unwrap();
        assert_eq!(settings.watch_namespace.as_deref(), Some("builds"));
        assert_eq!(settings.worker_concurrency, 3);
        assert_eq!(settings.worker_name.as_deref(), Some("shard-a"));
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.shell.namespace, "forge-jobs");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings = settings(&[("WATCH_NAMESPACE", "  ")]).unwrap();
        assert!(settings.watch_namespace.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            settings(&[("WORKER_CONCURRENCY", "many")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            settings(&[("WORKER_CONCURRENCY", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            settings(&[("LOG_FORMAT", "xml")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
