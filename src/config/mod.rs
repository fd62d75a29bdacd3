//! Typed configuration for throttles and the process around them.
//!
//! Limits come from code, environment variables or a TOML file. An absent
//! limit means that dimension is not throttled; zero is rejected at parse time.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;

const DEFAULT_NAME: &str = "throttle";

/// Limits and identity of a single [`Throttle`](crate::Throttle).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Reported in logs, spans and metric labels.
    pub name: String,
    /// Cap on started-but-unfinished work. `None` = unbounded.
    pub max_outstanding: Option<NonZeroUsize>,
    /// Cap on starts within any trailing one-second window. `None` = unbounded.
    pub max_qps: Option<NonZeroUsize>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            max_outstanding: None,
            max_qps: None,
        }
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThrottleFile {
    throttle: ThrottleConfig,
}

impl ThrottleConfig {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Allow at most `limit` pieces of work to be outstanding at once.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn with_max_outstanding(mut self, limit: usize) -> Self {
        self.max_outstanding = Some(positive(limit, "max_outstanding"));
        self
    }

    /// Allow at most `limit` starts within any one-second window.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn with_max_qps(mut self, limit: usize) -> Self {
        self.max_qps = Some(positive(limit, "max_qps"));
        self
    }

    /// Load throttle settings from `THROTTLE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            name: std::env::var("THROTTLE_NAME").unwrap_or(defaults.name),
            max_outstanding: limit_var("THROTTLE_MAX_OUTSTANDING")?,
            max_qps: limit_var("THROTTLE_MAX_QPS")?,
        })
    }

    /// Parse a document with a `[throttle]` table.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ThrottleFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad throttle config: {e}")))?;
        Ok(file.throttle)
    }

    /// Read and parse a TOML file with a `[throttle]` table.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be read, [`Error::Config`] if it does
    /// not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

/// Process-wide configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub throttle: ThrottleConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables, failing fast on bad limits.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            throttle: ThrottleConfig::from_env()?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn positive(limit: usize, what: &str) -> NonZeroUsize {
    match NonZeroUsize::new(limit) {
        Some(limit) => limit,
        None => panic!("{what} must be positive"),
    }
}

fn limit_var(name: &str) -> Result<Option<NonZeroUsize>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    raw.trim().parse::<NonZeroUsize>().map(Some).map_err(|e| {
        Error::Config(format!("{name} must be a positive integer, got {raw:?}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_with_both_limits() {
        let config = ThrottleConfig::from_toml_str(
            r#"
            [throttle]
            name = "search-api"
            max_outstanding = 4
            max_qps = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "search-api");
        assert_eq!(config.max_outstanding.map(NonZeroUsize::get), Some(4));
        assert_eq!(config.max_qps.map(NonZeroUsize::get), Some(20));
    }

    #[test]
    fn toml_missing_fields_are_unthrottled() {
        let config = ThrottleConfig::from_toml_str("[throttle]\n").unwrap();
        assert_eq!(config, ThrottleConfig::default());
    }

    #[test]
    fn toml_rejects_zero_and_unknown_keys() {
        assert!(ThrottleConfig::from_toml_str("[throttle]\nmax_qps = 0\n").is_err());
        assert!(ThrottleConfig::from_toml_str("[throttle]\nmax_rps = 3\n").is_err());
    }

    #[test]
    #[should_panic(expected = "max_qps must be positive")]
    fn builder_rejects_zero() {
        let _ = ThrottleConfig::default().with_max_qps(0);
    }

    #[test]
    #[should_panic(expected = "max_outstanding must be positive")]
    fn builder_rejects_zero_outstanding() {
        let _ = ThrottleConfig::default().with_max_outstanding(0);
    }
}
