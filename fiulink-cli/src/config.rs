//! Configuration file support for fiulink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FIULINK_*)
//! 3. Local config file (./fiulink.toml)
//! 4. Global config file (~/.config/fiulink/config.toml)
//!
//! Arguments and environment variables are both handled by clap; this module
//! fills in whatever they leave unset.

use directories::ProjectDirs;
use fiulink::LinkConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Baud rate used when nothing else is configured.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Link timing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkSection {
    /// Acknowledgment timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Link settings.
    #[serde(default)]
    pub link: LinkSection,
}

/// Effective settings after layering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Serial port, `None` means auto-detect.
    pub port: Option<String>,
    /// Baud rate.
    pub baud: u32,
    /// Link tuning.
    pub link: LinkConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("fiulink.toml")) {
            debug!("Loaded local config from fiulink.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: TOML {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "fiulink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.link.timeout_ms.is_some() {
            self.link.timeout_ms = other.link.timeout_ms;
        }
    }

    /// Layer explicit values (arguments or environment) over this config.
    pub fn resolve(
        &self,
        port: Option<String>,
        baud: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Settings {
        let mut link = LinkConfig::default();
        if let Some(ms) = timeout_ms.or(self.link.timeout_ms) {
            link = link.with_response_timeout(Duration::from_millis(ms));
        }

        Settings {
            port: port.or_else(|| self.connection.serial.clone()),
            baud: baud
                .or(self.connection.baud)
                .unwrap_or(DEFAULT_BAUD),
            link,
        }
    }
}
