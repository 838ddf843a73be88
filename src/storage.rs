use crate::config::ClientConfig;
use chat_protocol::persist_new;
use std::io;
use std::path::{Path, PathBuf};

/// Local folders for payloads received from other users.
///
/// Folders are created on first save; nothing is ever overwritten.
#[derive(Debug, Clone)]
pub struct Storage {
    downloads: PathBuf,
    received_audio: PathBuf,
}

impl Storage {
    pub fn new(downloads: impl Into<PathBuf>, received_audio: impl Into<PathBuf>) -> Self {
        Self {
            downloads: downloads.into(),
            received_audio: received_audio.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.downloads_dir(), config.received_audio_dir())
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads
    }

    pub fn received_audio_dir(&self) -> &Path {
        &self.received_audio
    }

    pub fn save_file(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        persist_new(&self.downloads, filename, bytes)
    }

    pub fn save_audio(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        persist_new(&self.received_audio, filename, bytes)
    }
}
