//! Relay configuration

use serde::Deserialize;

use crate::encoder::OutputMode;
use crate::error::{RelayError, Result};

pub const ENV_UPSTREAM_URL: &str = "CHATRELAY_UPSTREAM_URL";
pub const ENV_OUTPUT_MODE: &str = "CHATRELAY_OUTPUT_MODE";
pub const ENV_UPSTREAM_API_KEY: &str = "CHATRELAY_UPSTREAM_API_KEY";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "CHATRELAY_CONNECT_TIMEOUT_SECS";
pub const ENV_READ_TIMEOUT_SECS: &str = "CHATRELAY_READ_TIMEOUT_SECS";
pub const ENV_DOWNSTREAM_BUFFER: &str = "CHATRELAY_DOWNSTREAM_BUFFER";

/// Settings shared by every relay instance.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the upstream inference endpoint.
    pub upstream_base_url: String,
    /// Wire format written downstream.
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Bearer token added when the inbound request has no `Authorization` header.
    #[serde(default)]
    pub upstream_api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-read transport timeout. `None` waits as long as the upstream keeps the connection open.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    /// Number of encoded events that may wait for the downstream consumer.
    #[serde(default = "default_downstream_buffer")]
    pub downstream_buffer: usize,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_downstream_buffer() -> usize {
    1
}

impl RelayConfig {
    pub fn new(upstream_base_url: impl Into<String>) -> Self {
        Self {
            upstream_base_url: upstream_base_url.into(),
            output_mode: OutputMode::default(),
            upstream_api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: None,
            downstream_buffer: default_downstream_buffer(),
        }
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.upstream_api_key = Some(api_key.into());
        self
    }

    pub fn with_read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout_secs = Some(secs);
        self
    }

    pub fn with_downstream_buffer(mut self, capacity: usize) -> Self {
        self.downstream_buffer = capacity;
        self
    }

    /// Load configuration from `CHATRELAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream_base_url = lookup(ENV_UPSTREAM_URL)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Config(format!("{} must be set to the upstream base URL", ENV_UPSTREAM_URL))
            })?;

        let output_mode = match lookup(ENV_OUTPUT_MODE).filter(|value| !value.trim().is_empty()) {
            Some(value) => value.parse::<OutputMode>()?,
            None => OutputMode::default(),
        };

        let upstream_api_key = lookup(ENV_UPSTREAM_API_KEY).filter(|value| !value.trim().is_empty());
        let connect_timeout_secs = lookup(ENV_CONNECT_TIMEOUT_SECS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or_else(default_connect_timeout_secs);
        let read_timeout_secs =
            lookup(ENV_READ_TIMEOUT_SECS).and_then(|value| value.parse::<u64>().ok());
        let downstream_buffer = lookup(ENV_DOWNSTREAM_BUFFER)
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or_else(default_downstream_buffer);

        let config = Self {
            upstream_base_url,
            output_mode,
            upstream_api_key,
            connect_timeout_secs,
            read_timeout_secs,
            downstream_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.upstream_base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "Unsupported upstream scheme '{}'",
                url.scheme()
            )));
        }
        if self.downstream_buffer == 0 {
            return Err(RelayError::Config(
                "downstream_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_requires_upstream_url() {
        let err = RelayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        let err = RelayConfig::from_lookup(lookup_from(&[(ENV_UPSTREAM_URL, "  ")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config =
            RelayConfig::from_lookup(lookup_from(&[(ENV_UPSTREAM_URL, "http://localhost:11434")]))
                .unwrap();
        assert_eq!(config.output_mode, OutputMode::Sse);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, None);
        assert_eq!(config.downstream_buffer, 1);
        assert!(config.upstream_api_key.is_none());
    }

    #[test]
    fn test_reads_all_variables() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            (ENV_UPSTREAM_URL, "https://inference.example.com"),
            (ENV_OUTPUT_MODE, "ndjson"),
            (ENV_UPSTREAM_API_KEY, "sk-test"),
            (ENV_CONNECT_TIMEOUT_SECS, "3"),
            (ENV_READ_TIMEOUT_SECS, "45"),
            (ENV_DOWNSTREAM_BUFFER, "8"),
        ]))
        .unwrap();
        assert_eq!(config.output_mode, OutputMode::Ndjson);
        assert_eq!(config.upstream_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.read_timeout_secs, Some(45));
        assert_eq!(config.downstream_buffer, 8);
    }

    #[test]
    fn test_rejects_unknown_output_mode() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            (ENV_UPSTREAM_URL, "http://localhost"),
            (ENV_OUTPUT_MODE, "xml"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(RelayConfig::new("not a url").validate().is_err());
        assert!(RelayConfig::new("ftp://example.com").validate().is_err());
        assert!(
            RelayConfig::new("http://example.com")
                .with_downstream_buffer(0)
                .validate()
                .is_err()
        );
    }
}
