//! Configuration management for the CLI.

use keysync_engine::RetryPolicy;
use std::env;
use std::time::Duration;

/// Connection settings loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Gateway base URLs, tried in order
    pub endpoints: Vec<String>,
    /// Upper bound on a single store call
    pub request_timeout: Duration,
    /// Upper bound on establishing a connection
    pub connection_timeout: Duration,
    /// Wait between retries of a transient failure
    pub retry_interval: Duration,
    /// Retries after the first attempt
    pub retries: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoints = lookup("KEYSYNC_ENDPOINTS").ok_or(ConfigError::MissingEndpoints)?;
        let endpoints = parse_endpoints(&endpoints)?;

        let duration = |name: &'static str, default: &str| {
            let value = lookup(name).unwrap_or_else(|| default.to_string());
            humantime::parse_duration(value.trim())
                .map_err(|_| ConfigError::InvalidDuration { name, value })
        };

        let request_timeout = duration("KEYSYNC_REQUEST_TIMEOUT", "10s")?;
        let connection_timeout = duration("KEYSYNC_CONNECTION_TIMEOUT", "10s")?;
        let retry_interval = duration("KEYSYNC_RETRY_INTERVAL", "100ms")?;

        let retries = match lookup("KEYSYNC_RETRIES") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidRetries(value))?,
            None => 10,
        };

        Ok(Self {
            endpoints,
            request_timeout,
            connection_timeout,
            retry_interval,
            retries,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_interval, self.request_timeout)
    }
}

fn parse_endpoints(value: &str) -> Result<Vec<String>, ConfigError> {
    let endpoints: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| e.trim_end_matches('/').to_string())
        .collect();

    if endpoints.is_empty() {
        return Err(ConfigError::MissingEndpoints);
    }
    if let Some(bad) = endpoints
        .iter()
        .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
    {
        return Err(ConfigError::InvalidEndpoint(bad.clone()));
    }
    Ok(endpoints)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("KEYSYNC_ENDPOINTS environment variable is required")]
    MissingEndpoints,

    #[error("Invalid endpoint '{0}': expected an http:// or https:// URL")]
    InvalidEndpoint(String),

    #[error("Invalid {name} value '{value}'")]
    InvalidDuration { name: &'static str, value: String },

    #[error("Invalid KEYSYNC_RETRIES value '{0}'")]
    InvalidRetries(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("KEYSYNC_ENDPOINTS", "http://127.0.0.1:2379")]).unwrap();
        assert_eq!(config.endpoints, vec!["http://127.0.0.1:2379"]);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert_eq!(config.retries, 10);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("KEYSYNC_ENDPOINTS", " http://a:2379/ , https://b:2379,"),
            ("KEYSYNC_REQUEST_TIMEOUT", "2s 500ms"),
            ("KEYSYNC_CONNECTION_TIMEOUT", "1m"),
            ("KEYSYNC_RETRY_INTERVAL", "1s"),
            ("KEYSYNC_RETRIES", "3"),
        ])
        .unwrap();
        assert_eq!(config.endpoints, vec!["http://a:2379", "https://b:2379"]);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn missing_endpoints() {
        assert_eq!(load(&[]), Err(ConfigError::MissingEndpoints));
        assert_eq!(
            load(&[("KEYSYNC_ENDPOINTS", " , ")]),
            Err(ConfigError::MissingEndpoints)
        );
    }

    #[test]
    fn invalid_values() {
        assert_eq!(
            load(&[("KEYSYNC_ENDPOINTS", "127.0.0.1:2379")]),
            Err(ConfigError::InvalidEndpoint("127.0.0.1:2379".into()))
        );
        assert!(matches!(
            load(&[
                ("KEYSYNC_ENDPOINTS", "http://a"),
                ("KEYSYNC_RETRY_INTERVAL", "soon")
            ]),
            Err(ConfigError::InvalidDuration {
                name: "KEYSYNC_RETRY_INTERVAL",
                ..
            })
        ));
        assert_eq!(
            load(&[("KEYSYNC_ENDPOINTS", "http://a"), ("KEYSYNC_RETRIES", "-1")]),
            Err(ConfigError::InvalidRetries("-1".into()))
        );
    }
}
