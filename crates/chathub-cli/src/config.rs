//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Configuration for chathub
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// Talk to Ollama over https
    pub use_https: Option<bool>,
    /// Default model for new conversations
    pub model: Option<String>,
    /// Where the application state is kept
    pub state_file: Option<String>,
    /// Quiet period before a state snapshot is written
    pub persist_debounce_ms: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chathub")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CHATHUB_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Default location of the state snapshot
    pub fn default_state_file() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chathub")
            .join("state.json")
    }

    /// Load config from the default path, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            host: Some(DEFAULT_HOST.to_string()),
            port: Some(DEFAULT_PORT),
            use_https: Some(false),
            model: None,
            state_file: None,
            persist_debounce_ms: Some(DEFAULT_DEBOUNCE_MS),
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_state_file)
    }

    pub fn persist_debounce_ms(&self) -> u64 {
        self.persist_debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chathub configuration file
# Place at ~/.config/chathub/config.toml (Linux) or set CHATHUB_CONFIG_PATH

# Ollama server
host = "localhost"
port = 11434
use_https = false

# Model for new conversations (defaults to the first installed model)
# model = "llama3.2"

# Application state snapshot (defaults to the platform data directory)
# state_file = "~/.local/share/chathub/state.json"

# Quiet period in milliseconds before state is written to disk
persist_debounce_ms = 200
"#
}
