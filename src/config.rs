use chat_protocol::DEFAULT_CHUNK_SIZE;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65436;

pub const DOWNLOADS_DIR: &str = "descargas_chat";
pub const RECEIVED_AUDIO_DIR: &str = "audios_recibidos";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port '{0}': expected a number between 1 and 65535")]
    InvalidPort(String),
    #[error("A username is required to log in")]
    MissingUsername,
    #[error("Invalid value for {var}: {reason}")]
    Env { var: String, reason: String },
}

/// Client settings: where the relay is, who we are, and where files go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub data_dir: PathBuf,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            data_dir: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RELAY_CHAT_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist

        let mut config = Self::default();

        if let Some(host) = read_var("RELAY_CHAT_HOST")? {
            config.host = host;
        }
        if let Some(port) = read_var("RELAY_CHAT_PORT")? {
            config.port = parse_port(&port)?;
        }
        if let Some(user) = read_var("RELAY_CHAT_USER")? {
            config.username = user;
        }
        if let Some(dir) = read_var("RELAY_CHAT_DATA_DIR")? {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = read_var("RELAY_CHAT_CHUNK_SIZE")? {
            config.chunk_size = parse_chunk_size(&size)?;
        }

        Ok(config)
    }

    /// Checks that must pass before connecting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingUsername);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Env {
                var: "chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join(DOWNLOADS_DIR)
    }

    pub fn received_audio_dir(&self) -> PathBuf {
        self.data_dir.join(RECEIVED_AUDIO_DIR)
    }

    pub fn sent_audio_dir(&self) -> PathBuf {
        self.data_dir.join(voice::SENT_AUDIO_DIR)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn read_var(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::Env {
            var: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Parse a TCP port, rejecting 0
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(value.to_string())),
    }
}

fn parse_chunk_size(value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::Env {
            var: "RELAY_CHAT_CHUNK_SIZE".to_string(),
            reason: format!("'{}' is not a positive integer", value),
        }),
    }
}
