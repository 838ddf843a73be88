use crate::error::{Result, VoiceError};
use crate::types::CaptureConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// An open input stream handing out fixed-size blocks of mono samples.
///
/// Implementations are created and used on the capture thread only, so they
/// do not need to be `Send`.
pub trait BlockSource {
    /// Rate the samples were actually captured at
    fn sample_rate(&self) -> u32;

    /// Wait up to `timeout` for the next block. `Ok(None)` means no block
    /// was ready in time.
    fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>>;
}

/// Opens input streams for the capture thread
pub trait CaptureBackend: Send + Sync {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn BlockSource>>;
}

/// Microphone capture through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureBackend;

impl CaptureBackend for CpalCaptureBackend {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn BlockSource>> {
        Ok(Box::new(CpalBlockSource::open(config)?))
    }
}

struct CpalBlockSource {
    _stream: Stream,
    receiver: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    block_size: usize,
    sample_rate: u32,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl CpalBlockSource {
    fn open(config: &CaptureConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(VoiceError::Config("block size must be non-zero".into()));
        }

        let host = cpal::default_host();
        log::info!("🎤 Initializing audio capture with host: {:?}", host.id());

        let device = if let Some(name) = &config.device_name {
            host.input_devices()?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| VoiceError::Device(format!("Device '{}' not found", name)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| VoiceError::Device("No default input device available".into()))?
        };

        log::info!("🎤 Using input device: {:?}", device.name());

        let supported = find_input_config(&device, config.sample_rate)?;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();

        if stream_config.sample_rate.0 != config.sample_rate {
            log::warn!(
                "🎤 Device does not support {} Hz, capturing at {} Hz instead",
                config.sample_rate,
                stream_config.sample_rate.0
            );
        }

        let (sender, receiver) = unbounded();
        let stream_error = Arc::new(Mutex::new(None));

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_input_stream::<i16>(&device, &stream_config, sender, &stream_error)?
            }
            SampleFormat::U16 => {
                build_input_stream::<u16>(&device, &stream_config, sender, &stream_error)?
            }
            SampleFormat::F32 => {
                build_input_stream::<f32>(&device, &stream_config, sender, &stream_error)?
            }
            format => {
                return Err(VoiceError::Config(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream.play()?;

        log::info!(
            "🎤 Audio capture started: {} channels @ {}Hz ({:?})",
            stream_config.channels,
            stream_config.sample_rate.0,
            sample_format
        );

        Ok(Self {
            _stream: stream,
            receiver,
            pending: Vec::with_capacity(config.block_size * 2),
            block_size: config.block_size,
            sample_rate: stream_config.sample_rate.0,
            stream_error,
        })
    }

    fn take_stream_error(&self) -> Option<String> {
        match self.stream_error.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl BlockSource for CpalBlockSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        if let Some(err) = self.take_stream_error() {
            return Err(VoiceError::Stream(err));
        }

        let deadline = Instant::now() + timeout;
        while self.pending.len() < self.block_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(samples) => self.pending.extend_from_slice(&samples),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceError::Stream("Input stream closed".into()))
                }
            }
        }

        let rest = self.pending.split_off(self.block_size);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }
}

/// Pick an input configuration that supports `sample_rate`, preferring i16
/// samples. Falls back to the device default when no range contains the rate.
fn find_input_config(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let mut best: Option<(i32, SupportedStreamConfig)> = None;

    for range in device.supported_input_configs()? {
        let min_rate = range.min_sample_rate().0;
        let max_rate = range.max_sample_rate().0;
        log::debug!(
            "  Format: {:?}, Channels: {}, Sample Rate: {}-{} Hz",
            range.sample_format(),
            range.channels(),
            min_rate,
            max_rate
        );

        if sample_rate < min_rate || sample_rate > max_rate {
            continue;
        }

        let mut score = match range.sample_format() {
            SampleFormat::I16 => 50,
            SampleFormat::F32 => 25,
            SampleFormat::U16 => 10,
            _ => continue,
        };
        // Fewer channels means less to throw away
        score -= range.channels() as i32;

        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, range.with_sample_rate(cpal::SampleRate(sample_rate))));
        }
    }

    match best {
        Some((_, config)) => Ok(config),
        None => Ok(device.default_input_config()?),
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    sender: Sender<Vec<i16>>,
    stream_error: &Arc<Mutex<Option<String>>>,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let error_slot = Arc::clone(stream_error);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Keep channel 0 of every frame
            let samples: Vec<i16> = data
                .chunks(channels)
                .filter_map(|frame| frame.first())
                .map(|&sample| i16::from_sample(sample))
                .collect();
            let _ = sender.send(samples);
        },
        move |err| {
            log::error!("🎤 Audio stream error: {}", err);
            if let Ok(mut slot) = error_slot.lock() {
                *slot = Some(err.to_string());
            }
        },
        None,
    )?;

    Ok(stream)
}
