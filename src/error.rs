use crate::config::ConfigError;
use chat_protocol::ProtocolError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use voice::VoiceError;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Login failed: {0}")]
    Login(#[source] ProtocolError),

    #[error("Send failed: {0}")]
    Send(#[source] ProtocolError),

    #[error("Not connected to the server")]
    NotConnected,

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
