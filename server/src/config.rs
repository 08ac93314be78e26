use std::path::{Path, PathBuf};

use ctf_shared::config::GameModeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Capacity of the game loop's command channel
    pub command_capacity: usize,
    /// Game-mode config file (JSON). Built-in defaults when unset.
    pub game_config_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9010".to_string(),
            command_capacity: 256,
            game_config_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CTF_LISTEN_ADDR` and `CTF_CONFIG`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CTF_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(path) = std::env::var("CTF_CONFIG") {
            if !path.is_empty() {
                config.game_config_path = Some(PathBuf::from(path));
            }
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.command_capacity == 0 {
            return Err("command_capacity must be > 0".to_string());
        }
        Ok(())
    }

    /// Game-mode config from `game_config_path`, or the defaults.
    pub fn load_game_config(&self) -> Result<GameModeConfig, ConfigError> {
        match &self.game_config_path {
            Some(path) => load_game_config(path),
            None => {
                let config = GameModeConfig::default();
                config.validate().map_err(ConfigError::Invalid)?;
                Ok(config)
            }
        }
    }
}

/// Read, parse and validate a game-mode config file.
pub fn load_game_config(path: &Path) -> Result<GameModeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: GameModeConfig =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}
