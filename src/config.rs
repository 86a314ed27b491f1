//! Client configuration
//!
//! Options recognised at construction: the endpoint URL (required), the
//! fixed reconnect delay, the connect headers sent with every handshake and
//! an optional debug sink. Configuration may be built in code or loaded
//! from a TOML file.

use crate::observability::DebugSink;
use crate::transport::Headers;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Construction options for [`SocketClient`](crate::SocketClient)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URL, e.g. `ws://host/ws`
    #[serde(default)]
    pub url: String,
    /// Delay before each reconnect attempt; 0 disables auto-reconnect
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Connect headers sent at handshake time (e.g. bearer credentials)
    #[serde(default)]
    pub headers: Headers,
    /// Receives diagnostic notes; not part of the file format
    #[serde(skip)]
    pub debug_sink: DebugSink,
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

/// Configuration errors. Fatal at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Socket url not defined")]
    MissingUrl,
    #[error("Invalid socket url: {0}")]
    InvalidUrl(String),
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            headers: Headers::new(),
            debug_sink: DebugSink::default(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_debug_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug_sink = DebugSink::new(sink);
        self
    }

    /// Reconnect delay, or `None` when auto-reconnect is disabled
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.reconnect_delay_ms))
    }

    /// Validate and return the parsed endpoint URL
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(self.url.clone()))
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl From<&str> for ClientConfig {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for ClientConfig {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_url_string() {
        let config = ClientConfig::from("ws://host/ws");

        assert_eq!(config.url, "ws://host/ws");
        assert_eq!(config.reconnect_delay_ms, 5000);
        assert_eq!(config.reconnect_delay(), Some(Duration::from_millis(5000)));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_zero_delay_disables_reconnect() {
        let config = ClientConfig::new("ws://host/ws").with_reconnect_delay(Duration::ZERO);
        assert_eq!(config.reconnect_delay_ms, 0);
        assert_eq!(config.reconnect_delay(), None);
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let result = ClientConfig::new("  ").validate();
        assert!(matches!(result, Err(ConfigError::MissingUrl)));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = ClientConfig::new("not a url").validate();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_valid_url_parses() {
        let url = ClientConfig::new("ws://localhost:3000/ws").validate().unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(3000));
    }

    #[test]
    fn test_toml_defaults() {
        let config: ClientConfig = toml::from_str(r#"url = "ws://host/ws""#).unwrap();
        assert_eq!(config.reconnect_delay_ms, 5000);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_toml_without_url_fails_validation() {
        let config: ClientConfig = toml::from_str("reconnect_delay_ms = 100").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingUrl)));
    }
}
