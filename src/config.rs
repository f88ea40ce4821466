use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::core::client::DEFAULT_BASE_URL;
use crate::core::poller::PollOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must not be empty")]
    Empty { name: &'static str },
}

/// Connection and polling settings, read from the environment.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// `RAGNAROK_URL`
    pub service_url: String,
    /// `RAGNAROK_POLL_INTERVAL_MS`, `RAGNAROK_TIMEOUT_MS`, `RAGNAROK_MAX_RETRIES`,
    /// `RAGNAROK_MAX_BACKOFF_MS`
    pub poll_options: PollOptions,
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_url = lookup("RAGNAROK_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if service_url.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "RAGNAROK_URL",
            });
        }

        let defaults = PollOptions::default();
        let poll_interval = millis(&lookup, "RAGNAROK_POLL_INTERVAL_MS")?
            .unwrap_or(defaults.poll_interval);
        let timeout = millis(&lookup, "RAGNAROK_TIMEOUT_MS")?;
        let max_retries = number(&lookup, "RAGNAROK_MAX_RETRIES")?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        let max_backoff = millis(&lookup, "RAGNAROK_MAX_BACKOFF_MS")?
            .unwrap_or(defaults.max_backoff);

        Ok(Self {
            service_url,
            poll_options: PollOptions {
                poll_interval,
                timeout,
                max_retries,
                max_backoff,
                jitter: defaults.jitter,
            },
        })
    }
}

fn number<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

fn millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(number(lookup, name)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = PollerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.service_url, "http://localhost:8081");
        assert_eq!(config.poll_options.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.poll_options.timeout, None);
        assert_eq!(config.poll_options.max_retries, None);
        assert_eq!(config.poll_options.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn reads_overrides() {
        let config = PollerConfig::from_lookup(lookup(&[
            ("RAGNAROK_URL", "http://ragnarok:9000"),
            ("RAGNAROK_POLL_INTERVAL_MS", "250"),
            ("RAGNAROK_TIMEOUT_MS", "60000"),
            ("RAGNAROK_MAX_RETRIES", "5"),
            ("RAGNAROK_MAX_BACKOFF_MS", " 4000 "),
        ]))
        .unwrap();
        assert_eq!(config.service_url, "http://ragnarok:9000");
        assert_eq!(config.poll_options.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poll_options.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.poll_options.max_retries, Some(5));
        assert_eq!(config.poll_options.max_backoff, Duration::from_secs(4));
    }

    #[test]
    fn rejects_garbage() {
        let err = PollerConfig::from_lookup(lookup(&[("RAGNAROK_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "RAGNAROK_MAX_RETRIES", .. }));

        let err = PollerConfig::from_lookup(lookup(&[("RAGNAROK_URL", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Empty { .. }));
    }
}
