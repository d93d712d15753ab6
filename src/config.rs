//! Configuration management module.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// BLE-to-TCP bridge connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Bridge TCP port (default: 9000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reply timeout per command in milliseconds (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// TCP connect timeout in milliseconds (default: 300).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    300
}

/// Image upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Animation frame rate used when none is given (default: 10).
    #[serde(default = "default_fps")]
    pub default_fps: u16,
}

fn default_fps() -> u16 {
    10
}

impl AppConfig {
    /// Get config file path (platform config dir, else next to the executable).
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = ProjectDirs::from("", "", "macropad-bridge") {
            return dirs.config_dir().join("config.toml");
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.host.trim().is_empty() {
            return Err(ConfigError::Validation("Bridge host cannot be empty".to_string()));
        }
        if self.bridge.port == 0 {
            return Err(ConfigError::Validation(
                "Bridge port must be greater than 0".to_string(),
            ));
        }
        if self.bridge.timeout_ms < 100 {
            return Err(ConfigError::Validation(
                "Reply timeout must be at least 100 ms".to_string(),
            ));
        }
        if self.bridge.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.upload.default_fps) {
            return Err(ConfigError::Validation(
                "Default fps must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl BridgeConfig {
    /// Reply timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_fps: default_fps(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bridge.port, 9000);
        assert_eq!(config.bridge.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str("[bridge]\nport = 9100\n").unwrap();
        assert_eq!(config.bridge.port, 9100);
        assert_eq!(config.bridge.host, "127.0.0.1");
        assert_eq!(config.upload.default_fps, 10);
    }

    #[test]
    fn test_validation_empty_host() {
        let mut config = AppConfig::default();
        config.bridge.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_port() {
        let mut config = AppConfig::default();
        config.bridge.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_timeout_bounds() {
        let mut config = AppConfig::default();

        config.bridge.timeout_ms = 50;
        assert!(config.validate().is_err());

        config.bridge.timeout_ms = 100;
        assert!(config.validate().is_ok());

        config.bridge.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fps_bounds() {
        let mut config = AppConfig::default();

        config.upload.default_fps = 0;
        assert!(config.validate().is_err());

        config.upload.default_fps = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("macropad-bridge-test-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.bridge.port = 9555;
        config.save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(loaded) => assert_eq!(loaded.bridge.port, 9555),
            other => panic!("expected Loaded, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_try_load_missing() {
        let path = Path::new("/nonexistent/macropad-bridge/config.toml");
        assert!(matches!(AppConfig::try_load(path), ConfigLoadResult::Missing));
    }
}
