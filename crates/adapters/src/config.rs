//! Adapter layer configuration
//!
//! Values come from defaults, environment variables (`from_env`) or a YAML
//! file (`load`). Every YAML field is optional.

use crate::error::AdapterError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl From<ConfigError> for AdapterError {
    fn from(err: ConfigError) -> Self {
        AdapterError::Configuration(err.to_string())
    }
}

/// Connection pool settings for relational backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
    /// Connections idle longer than this are pinged before reuse
    pub ping_idle_after_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 10,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: Some(1800),
            ping_idle_after_secs: 60,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn ping_idle_after(&self) -> Duration {
        Duration::from_secs(self.ping_idle_after_secs)
    }
}

/// Top-level adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub pool: PoolSettings,
    pub read_retry: RetryPolicy,
    /// Server selection bound for document-store connects
    pub connect_timeout_secs: u64,
    /// Server selection bound for health checks
    pub health_check_timeout_secs: u64,
    pub http_timeout_secs: u64,
    /// Override for the Firestore REST endpoint (emulators)
    pub firestore_base_url: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            read_retry: RetryPolicy::for_reads(),
            connect_timeout_secs: 10,
            health_check_timeout_secs: 5,
            http_timeout_secs: 30,
            firestore_base_url: None,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
            expected: expected.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

impl AdapterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_env("OMNIDB_POOL_MAX_CONNECTIONS", "a positive integer")? {
            config.pool.max_connections = v;
        }
        if let Some(v) = parse_env("OMNIDB_POOL_MIN_CONNECTIONS", "a non-negative integer")? {
            config.pool.min_connections = v;
        }
        if let Some(v) = parse_env("OMNIDB_POOL_ACQUIRE_TIMEOUT", "seconds as an integer")? {
            config.pool.acquire_timeout_secs = v;
        }
        if let Some(v) = parse_env("OMNIDB_READ_RETRIES", "a positive integer")? {
            config.read_retry.retries = v;
        }
        if let Some(v) = parse_env("OMNIDB_READ_BASE_DELAY_MS", "milliseconds as an integer")? {
            config.read_retry.base_delay_ms = v;
        }
        if let Some(v) = parse_env("OMNIDB_READ_MAX_DELAY_MS", "milliseconds as an integer")? {
            config.read_retry.max_delay_ms = v;
        }
        if let Some(v) = parse_env("OMNIDB_CONNECT_TIMEOUT", "seconds as an integer")? {
            config.connect_timeout_secs = v;
        }
        if let Some(v) = parse_env("OMNIDB_HTTP_TIMEOUT", "seconds as an integer")? {
            config.http_timeout_secs = v;
        }
        if let Ok(host) = env::var("FIRESTORE_EMULATOR_HOST") {
            config.firestore_base_url = Some(format!("http://{}/v1", host.trim_end_matches('/')));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.max_connections".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "pool.min_connections".to_string(),
                value: self.pool.min_connections.to_string(),
                expected: format!("at most max_connections ({})", self.pool.max_connections),
            });
        }
        if self.read_retry.retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "read_retry.retries".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        if self.read_retry.base_delay_ms > self.read_retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "read_retry.base_delay_ms".to_string(),
                value: self.read_retry.base_delay_ms.to_string(),
                expected: format!("at most max_delay_ms ({})", self.read_retry.max_delay_ms),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_VARS: &[&str] = &[
        "OMNIDB_POOL_MAX_CONNECTIONS",
        "OMNIDB_POOL_MIN_CONNECTIONS",
        "OMNIDB_POOL_ACQUIRE_TIMEOUT",
        "OMNIDB_READ_RETRIES",
        "OMNIDB_READ_BASE_DELAY_MS",
        "OMNIDB_READ_MAX_DELAY_MS",
        "OMNIDB_CONNECT_TIMEOUT",
        "OMNIDB_HTTP_TIMEOUT",
        "FIRESTORE_EMULATOR_HOST",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AdapterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.read_retry, RetryPolicy::for_reads());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_check_timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("OMNIDB_POOL_MAX_CONNECTIONS", "25");
        env::set_var("OMNIDB_READ_RETRIES", "3");
        env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");

        let config = AdapterConfig::from_env().unwrap();
        assert_eq!(config.pool.max_connections, 25);
        assert_eq!(config.read_retry.retries, 3);
        assert_eq!(
            config.firestore_base_url.as_deref(),
            Some("http://localhost:8080/v1")
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        env::set_var("OMNIDB_POOL_MAX_CONNECTIONS", "many");
        let err = AdapterConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "OMNIDB_POOL_MAX_CONNECTIONS"
        ));

        env::set_var("OMNIDB_POOL_MAX_CONNECTIONS", "0");
        assert!(AdapterConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "pool:\n  max_connections: 4\nread_retry:\n  retries: 2\nhttp_timeout_secs: 5"
        )
        .unwrap();

        let config = AdapterConfig::load(file.path()).unwrap();
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.acquire_timeout_secs, 10);
        assert_eq!(config.read_retry.retries, 2);
        assert_eq!(config.read_retry.base_delay_ms, 200);
        assert_eq!(config.http_timeout_secs, 5);
    }

    #[test]
    fn test_load_reports_path() {
        let err = AdapterConfig::load("/nonexistent/omnidb.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/omnidb.yaml"));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = AdapterConfig::default();
        config.pool.min_connections = 20;
        assert!(config.validate().is_err());

        let mut config = AdapterConfig::default();
        config.read_retry = RetryPolicy::new(3, 2000, 1000);
        assert!(config.validate().is_err());
    }
}
