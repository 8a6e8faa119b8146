//! Client settings persistence
//!
//! Handles loading and saving endpoint, sync and reconnect preferences.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Where the hub, REST API and content server live
    pub endpoints: EndpointSettings,
    /// Synchronizer tuning
    pub sync: SyncSettings,
    /// Hub reconnection and keep-alive
    pub reconnect: ReconnectSettings,
    /// Local output
    #[serde(default)]
    pub audio: AudioSettings,
}

/// Remote endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Playback hub URL (http/https, upgraded to ws/wss)
    pub hub_url: String,
    /// REST API base URL
    pub api_base_url: String,
    /// Content server base URL (audio and cover images)
    pub content_base_url: String,
    /// Connect straight to the WebSocket without the negotiate round trip
    #[serde(default)]
    pub skip_negotiation: bool,
    /// Optional HTTP(S)/SOCKS proxy for REST calls
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Synchronizer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Allowed drift between local and pushed position before a forced seek
    pub drift_tolerance_secs: f64,
    /// How long a released seek may wait for its acknowledgement
    pub seek_timeout_ms: u64,
    /// Bounded wait for any command acknowledgement
    pub ack_timeout_ms: u64,
    /// Start the first queued track when the hub reports no current track
    #[serde(default = "default_true")]
    pub auto_start_on_empty: bool,
}

/// Hub reconnection and keep-alive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before each reconnect attempt; reconnecting stops after the last one
    pub delays_ms: Vec<u64>,
    /// Extra random delay as a fraction of each step (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Interval between client keep-alive pings
    pub keep_alive_ms: u64,
    /// Server silence after which the connection is treated as lost
    pub server_timeout_ms: u64,
}

/// Local output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Volume level (0.0 to 1.0)
    pub volume: f32,
}

fn default_true() -> bool {
    true
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: EndpointSettings::default(),
            sync: SyncSettings::default(),
            reconnect: ReconnectSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:5039/live".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            content_base_url: "http://localhost:5039".to_string(),
            skip_negotiation: false,
            proxy: None,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: 1.0,
            seek_timeout_ms: 3_000,
            ack_timeout_ms: 5_000,
            auto_start_on_empty: true,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            // Same schedule as the SignalR JS client's automatic reconnect
            delays_ms: vec![0, 2_000, 10_000, 30_000],
            jitter: default_jitter(),
            keep_alive_ms: 15_000,
            server_timeout_ms: 30_000,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self { volume: 0.7 }
    }
}

impl SyncSettings {
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl ReconnectSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        crate::utils::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| Self::load_from_file(&path).ok())
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save settings to the default file
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(path) = Self::file_path() {
            self.save_to_file(&path)
        } else {
            Err(SettingsError::Io(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}
