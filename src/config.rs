//! Application configuration.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! addr = "0.0.0.0:8080"
//! strategy = "cursor"          # or "wrapping" (default)
//! request_timeout_ms = 30000   # unset: no deadline
//! pool_capacity = 1024
//! body_buffer = 16
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::pipeline::Strategy;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` the server listens on.
    pub addr: String,
    /// Execution strategy for every pipeline of the application.
    pub strategy: Strategy,
    /// Per-request deadline. When it passes the request is cancelled.
    pub request_timeout_ms: Option<u64>,
    /// Idle contexts kept for reuse.
    pub pool_capacity: usize,
    /// Response chunks that may wait for a slow client before `flush` blocks.
    pub body_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_owned(),
            strategy: Strategy::default(),
            request_timeout_ms: None,
            pool_capacity: 1024,
            body_buffer: 16,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = Config::from_toml(
            r#"
            strategy = "cursor"
            request_timeout_ms = 250
            pool_capacity = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, Strategy::Cursor);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.addr, "0.0.0.0:3000");
    }

    #[test]
    fn unknown_strategies_are_rejected() {
        let err = Config::from_toml(r#"strategy = "recursive""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
