use serde::{Deserialize, Serialize};

use clamstream_protocol::wire::{DEFAULT_HOST, DEFAULT_PORT};

use crate::endpoint::{Endpoint, Timeout};

/// Global clamstream configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon connection settings
    pub daemon: DaemonConfig,

    /// Scanning behaviour
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon host name or address
    pub host: String,

    /// Daemon TCP port
    pub port: u16,

    /// Response timeout in milliseconds (0 = wait forever)
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Worker threads for asynchronous scanning (0 = available parallelism)
    pub workers: usize,

    /// Send whole files as a single chunk straight from the descriptor
    pub direct_file_transfer: bool,

    /// Follow symlinks when walking directories
    pub follow_symlinks: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: 0,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            direct_file_transfer: false,
            follow_symlinks: false,
        }
    }
}

impl ScannerConfig {
    /// Resolved worker count for the asynchronous pool
    pub fn worker_threads(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            default_workers()
        }
    }
}

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl Config {
    /// Load config from default locations (in order of precedence):
    /// 1. $PWD/.clamstream.toml
    /// 2. $XDG_CONFIG_HOME/clamstream/config.toml
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // Try project-level config
        if let Ok(content) = std::fs::read_to_string(".clamstream.toml") {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring invalid .clamstream.toml: {}", e),
            }
        }

        // Try user-level config
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("clamstream").join("config.toml");
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Ignoring invalid {}: {}", config_path.display(), e)
                    }
                }
            }
        }

        // Fall back to defaults
        Self::default()
    }

    /// Load config from a specific file
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Daemon address from the `[daemon]` section
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.daemon.host.clone(), self.daemon.port)
    }

    /// Response timeout from the `[daemon]` section
    pub fn timeout(&self) -> Timeout {
        Timeout::from_millis(self.daemon.timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
