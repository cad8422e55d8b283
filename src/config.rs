//! Configuration persistence for qrattend settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which camera to open when no device is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera, pointed away from the operator
    #[default]
    Environment,
    /// Front camera
    User,
}

impl std::str::FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "environment" | "enviroment" | "rear" => Ok(FacingMode::Environment),
            "user" | "front" => Ok(FacingMode::User),
            other => anyhow::bail!("Unknown facing mode: {}", other),
        }
    }
}

/// Scanner side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Base URL of the attendance server
    pub server_url: String,
    /// Maximum frames decoded per second (0 = unpaced)
    pub fps: u32,
    /// Side of the centered scan box in pixels (0 = whole frame)
    pub qrbox: u32,
    /// Longest side a scan box is downsampled to before decoding (0 = never)
    pub max_dim: u32,
    /// Camera selection when `device` is unset
    pub facing_mode: FacingMode,
    /// Explicit V4L2 device node
    pub device: Option<PathBuf>,
    /// Timeout for a single attendance request, in seconds
    pub request_timeout_secs: u64,
}

impl ScannerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            fps: 10,
            qrbox: 250,
            max_dim: 1280,
            facing_mode: FacingMode::Environment,
            device: None,
            request_timeout_secs: 10,
        }
    }
}

/// Attendance server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// SQLite database holding the roster
    pub database: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            database: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("qrattend")
                .join("asistencia.db"),
        }
    }
}

/// Application configuration persisted between sessions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Default location: `<config dir>/qrattend/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qrattend").join("config.json"))
    }

    /// Load configuration from `path`, or return defaults if the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from an explicit path, else from the default location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => {
                    log::warn!("Could not determine config directory, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scanner_widget() {
        let config = ScannerConfig::default();
        assert_eq!(config.fps, 10);
        assert_eq!(config.qrbox, 250);
        assert_eq!(config.facing_mode, FacingMode::Environment);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.scanner.server_url = "http://attendance.local:8080".to_string();
        config.scanner.facing_mode = FacingMode::User;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"scanner": {"fps": 5, "facing_mode": "user"}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scanner.fps, 5);
        assert_eq!(config.scanner.facing_mode, FacingMode::User);
        assert_eq!(config.scanner.qrbox, 250);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_facing_mode_parse() {
        assert_eq!("user".parse::<FacingMode>().unwrap(), FacingMode::User);
        assert_eq!(
            "Environment".parse::<FacingMode>().unwrap(),
            FacingMode::Environment
        );
        // Common misspelling accepted
        assert_eq!(
            "enviroment".parse::<FacingMode>().unwrap(),
            FacingMode::Environment
        );
        assert!("sideways".parse::<FacingMode>().is_err());
    }
}
