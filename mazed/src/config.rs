//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default, so an
//! empty or missing file yields a working setup. Command line flags are
//! applied on top by the binary.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "mazed.toml";

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port of the game line protocol.
    pub game_port: u16,
    /// Port of the WebSocket spectator channel.
    pub websocket_port: u16,
    /// One login per line.
    pub users_file: PathBuf,
    /// How long a fresh worker waits for its first connection.
    pub idle_timeout_ms: u64,
    /// Bound of every game connection's outbound queue.
    pub queue_limit: usize,
    /// Program run as `hook <login> <level>` when a level is solved.
    pub result_hook: Option<PathBuf>,
    pub logging: LoggingSettings,
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game_port: 4000,
            websocket_port: 1234,
            users_file: PathBuf::from("users"),
            idle_timeout_ms: 500,
            queue_limit: crate::net::QUEUE_LIMIT,
            result_hook: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Parses a configuration document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`]
    /// is used if present and the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_limit == 0 {
            return Err(Error::Config("queue_limit must be at least 1".to_string()));
        }
        if self.game_port != 0 && self.game_port == self.websocket_port {
            return Err(Error::Config(
                "game_port and websocket_port must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
