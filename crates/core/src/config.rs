//! Configuration management for Beacon.
//!
//! Configuration is read from a TOML file and then overridden by
//! `BEACON_*` environment variables, so a container can ship one file and
//! still be re-pointed per deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Default check-in geofence radius in meters
pub const DEFAULT_CHECK_IN_RADIUS_M: f64 = 500.0;

/// Default number of optimistic-concurrency retries per record update
pub const DEFAULT_MAX_UPDATE_RETRIES: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API bind address
    pub http_addr: String,
    /// WebSocket feed bind address
    pub ws_addr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; in-memory store when absent
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum distance from the task location for an in-range check-in
    #[serde(default = "default_check_in_radius")]
    pub check_in_radius_meters: f64,
    /// Reload-and-retry budget when a record changed underneath an update
    #[serde(default = "default_max_update_retries")]
    pub max_update_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_check_in_radius() -> f64 {
    DEFAULT_CHECK_IN_RADIUS_M
}

fn default_max_update_retries() -> u32 {
    DEFAULT_MAX_UPDATE_RETRIES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            check_in_radius_meters: DEFAULT_CHECK_IN_RADIUS_M,
            max_update_retries: DEFAULT_MAX_UPDATE_RETRIES,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults; then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            #[cfg(feature = "toml")]
            Some(path) => Self::from_file(path)?,
            #[cfg(not(feature = "toml"))]
            Some(path) => anyhow::bail!(
                "config file {} given but TOML support is disabled",
                path.display()
            ),
            None => Self::default_config(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BEACON_*` overrides from an environment lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BEACON_HTTP_ADDR") {
            self.server.http_addr = addr;
        }
        if let Some(addr) = lookup("BEACON_WS_ADDR") {
            self.server.ws_addr = addr;
        }
        if let Some(path) = lookup("BEACON_DB_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(radius) = lookup("BEACON_CHECK_IN_RADIUS_M") {
            self.dispatch.check_in_radius_meters = radius.parse().map_err(|_| {
                CoreError::Config(format!("BEACON_CHECK_IN_RADIUS_M is not a number: {}", radius))
            })?;
        }
        if let Some(level) = lookup("BEACON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("BEACON_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let radius = self.dispatch.check_in_radius_meters;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(CoreError::Config(format!(
                "check_in_radius_meters must be a positive number, got {}",
                radius
            )));
        }
        if self.dispatch.max_update_retries == 0 {
            return Err(CoreError::Config(
                "max_update_retries must be at least 1".to_string(),
            ));
        }
        if self.server.http_addr.is_empty() || self.server.ws_addr.is_empty() {
            return Err(CoreError::Config("bind addresses cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                http_addr: "0.0.0.0:8080".to_string(),
                ws_addr: "0.0.0.0:8081".to_string(),
            },
            storage: StorageConfig::default(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.check_in_radius_meters, 500.0);
        assert!(config.storage.sqlite_path.is_none());
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            [server]
            http_addr = "127.0.0.1:9000"
            ws_addr = "127.0.0.1:9001"

            [dispatch]
            check_in_radius_meters = 250.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:9000");
        assert_eq!(config.dispatch.check_in_radius_meters, 250.0);
        assert_eq!(config.dispatch.max_update_retries, DEFAULT_MAX_UPDATE_RETRIES);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let result = Config::from_toml_str(
            r#"
            [server]
            http_addr = "127.0.0.1:9000"
            ws_addr = "127.0.0.1:9001"

            [dispatch]
            check_in_radius_meters = 0.0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BEACON_DB_PATH", "/var/lib/beacon/dispatch.db"),
            ("BEACON_CHECK_IN_RADIUS_M", "750"),
            ("BEACON_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default_config();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.storage.sqlite_path,
            Some(PathBuf::from("/var/lib/beacon/dispatch.db"))
        );
        assert_eq!(config.dispatch.check_in_radius_meters, 750.0);
        assert!(config.logging.json);
    }

    #[test]
    fn test_env_override_bad_radius() {
        let mut config = Config::default_config();
        let result = config.apply_env_overrides(|key| {
            (key == "BEACON_CHECK_IN_RADIUS_M").then(|| "far".to_string())
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
