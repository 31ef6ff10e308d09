//! Session configuration
//!
//! Loaded from `spinroom.toml`. A missing or unusable `[store]` section means
//! the session runs in local mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{is_valid_path_segment, DEFAULT_ROOMS_PATH};

pub const CONFIG_FILE_NAME: &str = "spinroom.toml";

/// Top-level config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Room store connection; absent means local mode
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Where the room store lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `host:port` of the store server
    pub address: String,
    /// Parent path of room records
    #[serde(default = "default_rooms_path")]
    pub rooms_path: String,
}

fn default_rooms_path() -> String {
    DEFAULT_ROOMS_PATH.to_string()
}

impl StoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rooms_path: default_rooms_path(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let address = self.address.trim();
        let port = address
            .rsplit_once(':')
            .map(|(_, port)| port)
            .ok_or_else(|| Error::Config(format!("store address '{}' has no port", address)))?;
        port.parse::<u16>()
            .map_err(|_| Error::Config(format!("store address '{}' has a bad port", address)))?;

        let segments: Vec<&str> = self
            .rooms_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(Error::Config("rooms_path is empty".into()));
        }
        if let Some(bad) = segments
            .iter()
            .find(|s| !is_valid_path_segment(s))
        {
            return Err(Error::Config(format!("rooms_path segment '{}' is invalid", bad)));
        }
        Ok(())
    }
}

/// Timing knobs for the synchronization engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a spin broadcast stays in the room record
    pub spin_event_ttl_ms: u64,
    /// Minimum gap between rotation pushes during a host spin
    pub spin_push_interval_ms: u64,
    /// Delay after a spin before the idle drift resumes
    pub idle_resume_delay_ms: u64,
    /// Animation tick
    pub frame_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            spin_event_ttl_ms: 100,
            spin_push_interval_ms: 100,
            idle_resume_delay_ms: 20_000,
            frame_interval_ms: 16,
        }
    }
}

impl SyncConfig {
    pub fn spin_event_ttl(&self) -> Duration {
        Duration::from_millis(self.spin_event_ttl_ms)
    }

    pub fn spin_push_interval(&self) -> Duration {
        Duration::from_millis(self.spin_push_interval_ms)
    }

    pub fn idle_resume_delay(&self) -> Duration {
        Duration::from_millis(self.idle_resume_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl AppConfig {
    /// Parse config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load config, falling back to defaults (local mode) on any problem
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            debug!("No config directory available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "spinroom", "spinroom")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// The store section, if present and usable
    pub fn usable_store(&self) -> Option<&StoreConfig> {
        let store = self.store.as_ref()?;
        match store.validate() {
            Ok(()) => Some(store),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid store config");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(
            r#"
            [store]
            address = "127.0.0.1:7331"
            rooms_path = "wheels/rooms"

            [sync]
            spin_event_ttl_ms = 250
            idle_resume_delay_ms = 5000
            "#,
        )
        .unwrap();

        let store = config.usable_store().unwrap();
        assert_eq!(store.address, "127.0.0.1:7331");
        assert_eq!(store.rooms_path, "wheels/rooms");
        assert_eq!(config.sync.spin_event_ttl(), Duration::from_millis(250));
        assert_eq!(config.sync.idle_resume_delay_ms, 5000);
        // Unset keys keep their defaults
        assert_eq!(config.sync.frame_interval_ms, 16);
    }

    #[test]
    fn test_missing_store_means_local_mode() {
        let config = AppConfig::from_toml_str("[sync]\nframe_interval_ms = 20\n").unwrap();
        assert!(config.store.is_none());
        assert!(config.usable_store().is_none());
    }

    #[test]
    fn test_invalid_store_is_ignored() {
        let config = AppConfig {
            store: Some(StoreConfig::new("localhost")),
            sync: SyncConfig::default(),
        };
        assert!(config.usable_store().is_none());

        let mut store = StoreConfig::new("localhost:7331");
        assert!(store.validate().is_ok());
        store.rooms_path = "bad.path".into();
        assert!(store.validate().is_err());
        store.rooms_path = "/".into();
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\naddress = \"example.net:9000\"").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        let store = config.usable_store().unwrap();
        assert_eq!(store.address, "example.net:9000");
        assert_eq!(store.rooms_path, DEFAULT_ROOMS_PATH);
    }

    #[test]
    fn test_unreadable_config_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let config = AppConfig::load_or_default(Some(file.path()));
        assert_eq!(config, AppConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(AppConfig::load_or_default(Some(&missing)), AppConfig::default());
    }
}
