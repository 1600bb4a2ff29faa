//! Sender configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/beam/sender.toml`
//! - Windows: `%APPDATA%/beam/sender.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use beam_session::{ReconnectConfig, TransferSettings};
use beam_transfer::StreamLimits;
use serde::{Deserialize, Serialize};

/// Sender configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Session channel the sender connects to.
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,

    /// Base URL chunk and file uploads are posted under.
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Hold new streams until approved with `approve <stream>` on stdin.
    /// Unset means no.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_pause: Option<bool>,

    /// Show user notifications.
    #[serde(default = "default_true")]
    pub notifications: bool,

    /// Files offered by this sender.
    #[serde(default)]
    pub shared_files: Vec<PathBuf>,

    /// Maximum chunks in flight per stream. Unset is unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_chunks: Option<usize>,

    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_ws_endpoint() -> String {
    "wss://beam.local/channel".into()
}

fn default_api_endpoint() -> String {
    "https://beam.local".into()
}

fn default_true() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    15_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_endpoint: default_ws_endpoint(),
            api_endpoint: default_api_endpoint(),
            auto_pause: None,
            notifications: default_true(),
            shared_files: Vec::new(),
            max_concurrent_chunks: None,
            reconnect: ReconnectSection::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`, readable only by the owner.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            backoff_factor: self.reconnect.backoff_factor,
        }
    }

    /// A limit of zero is treated as unset.
    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_concurrent_chunks: self.max_concurrent_chunks.filter(|&n| n > 0),
        }
    }
}

impl TransferSettings for Config {
    fn require_manual_start(&self) -> Option<bool> {
        self.auto_pause
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("beam")
            .join("sender.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("beam").join("sender.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/beam/sender.toml"))
    }
}
