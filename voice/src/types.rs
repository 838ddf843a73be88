use std::path::PathBuf;
use std::time::Duration;

/// Requested capture rate for voice notes
pub const SAMPLE_RATE: u32 = 44_100;

/// Voice notes are mono
pub const CHANNELS: u16 = 1;

/// Samples per capture block
pub const BLOCK_SIZE: usize = 512;

/// Recordings with fewer blocks than this are discarded
pub const MIN_RECORDING_BLOCKS: usize = 5;

/// How long the capture thread waits for a block before re-checking its stop flag
pub const BLOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Where a recorder keeps the voice notes it sends
pub const SENT_AUDIO_DIR: &str = "audios_enviados";

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name (None = default device)
    pub device_name: Option<String>,
    pub sample_rate: u32,
    /// Samples handed out per block
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: SAMPLE_RATE,
            block_size: BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Saving,
}

/// A voice note that was saved and handed to the sender
#[derive(Debug, Clone)]
pub struct VoiceNote {
    pub path: PathBuf,
    pub filename: String,
    pub sample_rate: u32,
    pub blocks: usize,
    /// Mono samples actually captured, whatever the block size
    pub samples: usize,
    pub byte_len: u64,
}

impl VoiceNote {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.block_size, 512);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn test_voice_note_duration() {
        let note = VoiceNote {
            path: PathBuf::from("audio_alice_1.wav"),
            filename: "audio_alice_1.wav".to_string(),
            sample_rate: 16_000,
            blocks: 3,
            samples: 48_000,
            byte_len: 0,
        };
        assert_eq!(note.duration(), Duration::from_secs(3));
    }
}
