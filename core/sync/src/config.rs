//! Sync engine configuration.
//!
//! Values are layered: defaults, then an optional JSON file, then
//! `OFFSYNC_*` environment variables. Callers may apply further
//! overrides (e.g. CLI flags) with the `with_*` setters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

use offsync_common::{Error, Result};

use crate::scheduler::SyncMode;

/// Default remote endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api";

/// Environment variable names.
pub const ENV_ENDPOINT: &str = "OFFSYNC_ENDPOINT";
pub const ENV_BATCH_SIZE: &str = "OFFSYNC_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "OFFSYNC_MAX_RETRIES";
pub const ENV_PROBE_TIMEOUT: &str = "OFFSYNC_PROBE_TIMEOUT_SECS";
pub const ENV_BATCH_TIMEOUT: &str = "OFFSYNC_BATCH_TIMEOUT_SECS";

/// Serde adapter for durations written as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote authority.
    pub endpoint: String,
    /// Log entries per batch request.
    pub batch_size: usize,
    /// Failed attempts before an entry is given up on.
    pub max_retries: u32,
    /// Deadline for the liveness probe.
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    /// Deadline for one batch exchange.
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,
    /// When cycles are triggered automatically.
    pub sync_mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_size: 50,
            max_retries: 3,
            probe_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(30),
            sync_mode: SyncMode::Manual,
        }
    }
}

impl SyncConfig {
    /// Load defaults, an optional JSON file, then environment overrides.
    ///
    /// # Errors
    /// - File unreadable or not valid JSON
    /// - Environment value that does not parse
    /// - Resulting configuration fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        debug!("Loaded sync configuration from {}", path.display());
        Ok(config)
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `OFFSYNC_*` environment variables.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(value) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_var(ENV_BATCH_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            self.max_retries = parse_var(ENV_MAX_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_PROBE_TIMEOUT) {
            self.probe_timeout = Duration::from_secs(parse_var(ENV_PROBE_TIMEOUT, &value)?);
        }
        if let Some(value) = lookup(ENV_BATCH_TIMEOUT) {
            self.batch_timeout = Duration::from_secs(parse_var(ENV_BATCH_TIMEOUT, &value)?);
        }
        Ok(self)
    }

    /// Set the remote endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the liveness probe deadline.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the batch exchange deadline.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Set the scheduler mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Parsed endpoint, normalized to end with a slash so relative joins
    /// append rather than replace the last path segment.
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut raw = self.endpoint.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", self.endpoint, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::Config(format!(
                "Unsupported endpoint scheme '{}'",
                other
            ))),
        }
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.probe_timeout.is_zero() || self.batch_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        self.sync_mode.validate()
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.batch_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = SyncConfig::from_json(r#"{"batch_size": 10, "batch_timeout": 7}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_timeout, Duration::from_secs(7));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_json_roundtrip_keeps_values() {
        let config = SyncConfig::default()
            .with_endpoint("https://sync.example.com/v1")
            .with_max_retries(5)
            .with_probe_timeout(Duration::from_secs(2));
        let restored = SyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored.endpoint, "https://sync.example.com/v1");
        assert_eq!(restored.max_retries, 5);
        assert_eq!(restored.probe_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "https://remote.example.com"),
            (ENV_BATCH_SIZE, "25"),
            (ENV_BATCH_TIMEOUT, "12"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.endpoint, "https://remote.example.com");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.batch_timeout, Duration::from_secs(12));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_bad_override_rejected() {
        let result = SyncConfig::default().with_overrides(|key| {
            (key == ENV_MAX_RETRIES).then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation() {
        assert!(SyncConfig::default().with_batch_size(0).validate().is_err());
        assert!(SyncConfig::default().with_max_retries(0).validate().is_err());
        assert!(SyncConfig::default().with_endpoint("not a url").validate().is_err());
        assert!(SyncConfig::default()
            .with_endpoint("ftp://example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn test_zero_mode_interval_rejected() {
        let periodic =
            SyncConfig::from_json(r#"{"sync_mode": {"mode": "periodic", "interval": 0}}"#).unwrap();
        assert!(matches!(periodic.validate(), Err(Error::Config(_))));

        let reconnect = SyncConfig::from_json(
            r#"{"sync_mode": {"mode": "on_reconnect", "poll_interval": 0}}"#,
        )
        .unwrap();
        assert!(matches!(reconnect.validate(), Err(Error::Config(_))));

        let fine =
            SyncConfig::from_json(r#"{"sync_mode": {"mode": "periodic", "interval": 30}}"#).unwrap();
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn test_endpoint_url_appends_slash() {
        let config = SyncConfig::default().with_endpoint("http://host:8080/api");
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.join("health").unwrap().as_str(), "http://host:8080/api/health");
    }
}
