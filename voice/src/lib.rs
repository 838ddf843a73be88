//! Voice notes for relay-chat: microphone capture into a recording session,
//! WAV encoding, hand-off to a sender, and playback of received notes.
//!
//! Device access sits behind the [`CaptureBackend`] and [`PlaybackBackend`]
//! traits. The cpal implementations are the defaults; tests swap in scripted
//! ones.

pub mod audio_sink;
pub mod audio_source;
pub mod error;
pub mod recorder;
pub mod types;
pub mod wav;

pub use audio_sink::{BlockSink, CpalPlaybackBackend, PlaybackBackend};
pub use audio_source::{BlockSource, CaptureBackend, CpalCaptureBackend};
pub use error::{Result, VoiceError};
pub use recorder::VoicePipeline;
pub use types::*;
pub use wav::{encode_wav, open_wav};
