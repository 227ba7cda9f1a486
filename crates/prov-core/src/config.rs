//! provd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvConfig {
    pub store: StoreConfig,
    pub cleanup: CleanupConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Deadline applied to every lifecycle call, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/provgrid"),
            operation_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Finished reservations older than this are deleted.
    pub retention_hours: u64,
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            retention_hours: 24 * 14,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,provd=debug,provgrid=debug".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl ProvConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "store.operation_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cleanup.retention_hours > u64::MAX / 3600 {
            return Err(ConfigError::Invalid {
                field: "cleanup.retention_hours",
                reason: format!("{} hours does not fit in seconds", self.cleanup.retention_hours),
            });
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup.interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cleanup.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup.batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.store.data_dir.join("provgrid.redb")
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.store.operation_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup.interval_secs)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_secs(self.cleanup.retention_hours.saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ProvConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProvConfig::default());
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[store]
data_dir = "/tmp/provgrid"

[cleanup]
retention_hours = 48

[log]
format = "json"
"#;
        let config = ProvConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/provgrid/provgrid.redb"));
        assert_eq!(config.store.operation_timeout_ms, 5_000);
        assert_eq!(config.cleanup_retention(), Duration::from_secs(48 * 3600));
        assert_eq!(config.cleanup.interval_secs, 3600);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn oversized_retention_is_rejected() {
        let err = ProvConfig::from_toml_str("[cleanup]\nretention_hours = 9000000000000000000\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "cleanup.retention_hours",
                ..
            }
        ));

        // Built in code, validation is bypassed but the duration saturates.
        let mut config = ProvConfig::default();
        config.cleanup.retention_hours = u64::MAX;
        assert_eq!(config.cleanup_retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ProvConfig::from_toml_str("[store]\noperation_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "store.operation_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn render_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provd.toml");
        let mut config = ProvConfig::default();
        config.cleanup.enabled = false;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ProvConfig::from_file(&path).unwrap();
        assert!(!loaded.cleanup.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ProvConfig::default());
    }
}
