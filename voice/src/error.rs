use cpal::{
    BuildStreamError, DefaultStreamConfigError, DeviceNameError, DevicesError, PlayStreamError,
    SupportedStreamConfigsError,
};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recording too short: captured {blocks} blocks, need at least {min}")]
    RecordingTooShort { blocks: usize, min: usize },

    #[error("Audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to send voice note: {0}")]
    Send(String),

    #[error("Audio thread panicked")]
    ThreadPanicked,
}

impl From<DevicesError> for VoiceError {
    fn from(err: DevicesError) -> Self {
        VoiceError::Device(err.to_string())
    }
}

impl From<DeviceNameError> for VoiceError {
    fn from(err: DeviceNameError) -> Self {
        VoiceError::Device(err.to_string())
    }
}

impl From<SupportedStreamConfigsError> for VoiceError {
    fn from(err: SupportedStreamConfigsError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<DefaultStreamConfigError> for VoiceError {
    fn from(err: DefaultStreamConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<BuildStreamError> for VoiceError {
    fn from(err: BuildStreamError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}

impl From<PlayStreamError> for VoiceError {
    fn from(err: PlayStreamError) -> Self {
        VoiceError::Stream(err.to_string())
    }
}
