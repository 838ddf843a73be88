use crate::audio_sink::{CpalPlaybackBackend, PlaybackBackend};
use crate::audio_source::{CaptureBackend, CpalCaptureBackend};
use crate::error::{Result, VoiceError};
use crate::types::{
    CaptureConfig, RecorderState, VoiceNote, BLOCK_SIZE, BLOCK_TIMEOUT, MIN_RECORDING_BLOCKS,
};
use crate::wav::{encode_wav, open_wav};
use chat_protocol::{persist_new, Header};
use crossbeam_channel::{bounded, Sender};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Samples gathered by one capture thread
struct RecordingSession {
    blocks: Vec<Vec<i16>>,
    sample_rate: u32,
    error: Option<VoiceError>,
}

struct ActiveCapture {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<RecordingSession>,
}

/// Records voice notes, hands them to a sender, and plays WAV files.
///
/// The recorder moves `Idle -> Recording -> Saving -> Idle`. The capture
/// thread owns the samples; they are only read after it has been joined.
pub struct VoicePipeline {
    sent_dir: PathBuf,
    capture_config: CaptureConfig,
    capture_backend: Arc<dyn CaptureBackend>,
    playback_backend: Arc<dyn PlaybackBackend>,
    state: Arc<Mutex<RecorderState>>,
    active: Mutex<Option<ActiveCapture>>,
    players: Mutex<Vec<Weak<AtomicBool>>>,
}

impl VoicePipeline {
    pub fn new(
        sent_dir: impl Into<PathBuf>,
        capture_backend: Arc<dyn CaptureBackend>,
        playback_backend: Arc<dyn PlaybackBackend>,
    ) -> Self {
        Self {
            sent_dir: sent_dir.into(),
            capture_config: CaptureConfig::default(),
            capture_backend,
            playback_backend,
            state: Arc::new(Mutex::new(RecorderState::Idle)),
            active: Mutex::new(None),
            players: Mutex::new(Vec::new()),
        }
    }

    /// A pipeline using the default microphone and speakers
    pub fn with_cpal(sent_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            sent_dir,
            Arc::new(CpalCaptureBackend),
            Arc::new(CpalPlaybackBackend),
        )
    }

    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture_config = config;
        self
    }

    pub fn state(&self) -> RecorderState {
        *lock(&self.state)
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Start capturing. Does nothing (with a warning) while a recording is
    /// in progress or still being saved.
    ///
    /// Returns once the input stream is open, or with the error that
    /// prevented it from opening.
    pub fn start_recording(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if *state != RecorderState::Idle {
            log::warn!("🎙️ Cannot start recording while {:?}", *state);
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);
        let backend = Arc::clone(&self.capture_backend);
        let config = self.capture_config.clone();
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || capture_loop(backend.as_ref(), &config, &stop_flag, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                *state = RecorderState::Recording;
                *lock(&self.active) = Some(ActiveCapture { stop, handle });
                log::info!("🎙️ Recording started at {} Hz", sample_rate);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                log::error!("🎙️ Failed to open input stream: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VoiceError::ThreadPanicked)
            }
        }
    }

    /// Stop capturing and save/send the recording on a background thread.
    ///
    /// Returns `None` (after reporting through `log_fn`) when no recording is
    /// in progress. Otherwise the returned handle yields the sent note or the
    /// reason nothing was sent; every outcome is also reported via `log_fn`.
    pub fn stop_recording<F, E, L>(
        &self,
        recipient: &str,
        sender: &str,
        send_fn: F,
        log_fn: L,
    ) -> Option<JoinHandle<Result<VoiceNote>>>
    where
        F: FnOnce(Header, Vec<u8>) -> std::result::Result<(), E> + Send + 'static,
        E: Display,
        L: Fn(&str) + Send + 'static,
    {
        let active = {
            let mut state = lock(&self.state);
            let active = match *state {
                RecorderState::Recording => lock(&self.active).take(),
                _ => None,
            };

            match active {
                Some(active) => {
                    *state = RecorderState::Saving;
                    active
                }
                None => {
                    log::warn!("🎙️ Stop requested while {:?}", *state);
                    if *state == RecorderState::Recording {
                        // terminate() already took the capture
                        *state = RecorderState::Idle;
                    }
                    log_fn("No recording in progress.");
                    return None;
                }
            }
        };

        active.stop.store(true, Ordering::Release);
        let joined = active.handle.join();

        let state = Arc::clone(&self.state);
        let sent_dir = self.sent_dir.clone();
        let recipient = recipient.to_string();
        let sender = sender.to_string();

        Some(thread::spawn(move || {
            let result = match joined {
                Ok(session) => save_and_send(session, &sent_dir, &sender, &recipient, send_fn),
                Err(_) => Err(VoiceError::ThreadPanicked),
            };

            match &result {
                Ok(note) => {
                    log::info!(
                        "🎙️ Voice note {} ({:.1}s) sent to {}",
                        note.filename,
                        note.duration().as_secs_f32(),
                        recipient
                    );
                    log_fn(&format!("Voice note sent to {}.", recipient));
                }
                Err(e) => {
                    log::warn!("🎙️ Voice note not sent: {}", e);
                    log_fn(&format!("Voice note not sent: {}", e));
                }
            }

            *lock(&state) = RecorderState::Idle;
            result
        }))
    }

    /// Play a 16-bit PCM WAV file on a background thread.
    ///
    /// Playback ends when the file is exhausted or `terminate` is called.
    /// The outcome is reported through `log_fn` and the returned handle.
    pub fn play_audio<L>(&self, path: impl AsRef<Path>, log_fn: L) -> JoinHandle<Result<()>>
    where
        L: Fn(&str) + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let backend = Arc::clone(&self.playback_backend);
        let stop = Arc::new(AtomicBool::new(false));

        {
            let mut players = lock(&self.players);
            players.retain(|player| player.strong_count() > 0);
            players.push(Arc::downgrade(&stop));
        }

        thread::spawn(move || {
            let result = play_file(&path, backend.as_ref(), &stop);
            match &result {
                Ok(()) => log_fn(&format!("Finished playing {}.", path.display())),
                Err(e) => {
                    log::error!("🔊 Playback of {} failed: {}", path.display(), e);
                    log_fn(&format!("Could not play {}: {}", path.display(), e));
                }
            }
            result
        })
    }

    /// Stop any active capture (discarding it) and signal playback to end.
    /// Safe to call repeatedly.
    pub fn terminate(&self) -> Result<()> {
        for player in lock(&self.players).drain(..) {
            if let Some(stop) = player.upgrade() {
                stop.store(true, Ordering::Release);
            }
        }

        let active = lock(&self.active).take();
        if let Some(active) = active {
            active.stop.store(true, Ordering::Release);
            let joined = active.handle.join();

            {
                let mut state = lock(&self.state);
                if *state == RecorderState::Recording {
                    *state = RecorderState::Idle;
                }
            }

            let session = joined.map_err(|_| VoiceError::ThreadPanicked)?;
            log::info!(
                "🎙️ Discarded recording of {} blocks",
                session.blocks.len()
            );
        }

        Ok(())
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            log::error!("Failed to shut down voice pipeline: {}", e);
        }
    }
}

fn capture_loop(
    backend: &dyn CaptureBackend,
    config: &CaptureConfig,
    stop: &AtomicBool,
    ready: Sender<Result<u32>>,
) -> RecordingSession {
    let mut source = match backend.open(config) {
        Ok(source) => source,
        Err(e) => {
            let _ = ready.send(Err(e));
            return RecordingSession {
                blocks: Vec::new(),
                sample_rate: config.sample_rate,
                error: None,
            };
        }
    };

    let mut session = RecordingSession {
        blocks: Vec::new(),
        sample_rate: source.sample_rate(),
        error: None,
    };

    if ready.send(Ok(session.sample_rate)).is_err() {
        return session;
    }

    while !stop.load(Ordering::Acquire) {
        match source.next_block(BLOCK_TIMEOUT) {
            Ok(Some(block)) => session.blocks.push(block),
            Ok(None) => {}
            Err(e) => {
                log::error!("🎙️ Capture failed: {}", e);
                session.error = Some(e);
                break;
            }
        }
    }

    log::debug!("🎙️ Capture thread exiting after {} blocks", session.blocks.len());
    session
}

fn save_and_send<F, E>(
    session: RecordingSession,
    sent_dir: &Path,
    sender: &str,
    recipient: &str,
    send_fn: F,
) -> Result<VoiceNote>
where
    F: FnOnce(Header, Vec<u8>) -> std::result::Result<(), E>,
    E: Display,
{
    if let Some(e) = session.error {
        return Err(e);
    }

    let blocks = session.blocks.len();
    if blocks < MIN_RECORDING_BLOCKS {
        return Err(VoiceError::RecordingTooShort {
            blocks,
            min: MIN_RECORDING_BLOCKS,
        });
    }

    let samples = session.blocks.concat();
    let sample_count = samples.len();
    let bytes = encode_wav(&samples, session.sample_rate)?;
    drop(samples);

    let filename = format!("audio_{}_{}.wav", sender, chrono::Utc::now().timestamp());
    let path = persist_new(sent_dir, &filename, &bytes)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(filename);

    let byte_len = bytes.len() as u64;
    let header = Header::audio(sender, recipient, &filename, byte_len);
    send_fn(header, bytes).map_err(|e| VoiceError::Send(e.to_string()))?;

    Ok(VoiceNote {
        path,
        filename,
        sample_rate: session.sample_rate,
        blocks,
        samples: sample_count,
        byte_len,
    })
}

fn play_file(path: &Path, backend: &dyn PlaybackBackend, stop: &Arc<AtomicBool>) -> Result<()> {
    let mut reader = open_wav(path)?;
    let spec = reader.spec();
    let mut sink = backend.open(spec.sample_rate, spec.channels, Arc::clone(stop))?;

    log::info!(
        "🔊 Playing {} ({} Hz, {} ch)",
        path.display(),
        spec.sample_rate,
        spec.channels
    );

    let block_len = BLOCK_SIZE * spec.channels.max(1) as usize;
    let mut block = Vec::with_capacity(block_len);

    for sample in reader.samples::<i16>() {
        block.push(sample?);
        if block.len() == block_len {
            if stop.load(Ordering::Acquire) {
                log::info!("🔊 Playback of {} stopped", path.display());
                return Ok(());
            }
            sink.write_block(&block)?;
            block.clear();
        }
    }

    if !block.is_empty() && !stop.load(Ordering::Acquire) {
        sink.write_block(&block)?;
    }

    sink.finish()
}
