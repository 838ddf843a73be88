use crate::error::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Core trait for audio output on the playback thread
pub trait BlockSink {
    /// Queue interleaved 16-bit samples in the layout the sink was opened with.
    fn write_block(&mut self, samples: &[i16]) -> Result<()>;

    /// Block until queued audio has played out or playback was stopped.
    fn finish(&mut self) -> Result<()>;
}

/// Opens output streams for playback threads.
///
/// `stop` is raised when playback should end early; a sink must not block
/// indefinitely once it is set.
pub trait PlaybackBackend: Send + Sync {
    fn open(
        &self,
        sample_rate: u32,
        channels: u16,
        stop: Arc<AtomicBool>,
    ) -> Result<Box<dyn BlockSink>>;
}

/// Speaker output through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalPlaybackBackend;

impl PlaybackBackend for CpalPlaybackBackend {
    fn open(
        &self,
        sample_rate: u32,
        channels: u16,
        stop: Arc<AtomicBool>,
    ) -> Result<Box<dyn BlockSink>> {
        Ok(Box::new(CpalBlockSink::open(sample_rate, channels, stop)?))
    }
}

/// Queued input is capped at this many seconds before writers wait
const MAX_BUFFERED_SECS: u32 = 1;
const DRAIN_POLL: Duration = Duration::from_millis(10);

fn lock(queue: &Mutex<VecDeque<f32>>) -> MutexGuard<'_, VecDeque<f32>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CpalBlockSink {
    _stream: Stream,
    queue: Arc<Mutex<VecDeque<f32>>>,
    input_channels: usize,
    max_buffered: usize,
    stop: Arc<AtomicBool>,
    stream_failed: Arc<AtomicBool>,
}

impl CpalBlockSink {
    fn open(sample_rate: u32, channels: u16, stop: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::Device("No output device found".into()))?;

        log::debug!("🔊 Using output device: {:?}", device.name());

        let supported_config = device.default_output_config()?;
        let stream_config = supported_config.config();

        log::debug!(
            "🔊 Hardware format - {}Hz, {}ch, {:?} (source {}Hz, {}ch)",
            stream_config.sample_rate.0,
            stream_config.channels,
            supported_config.sample_format(),
            sample_rate,
            channels
        );

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let stream_failed = Arc::new(AtomicBool::new(false));

        let stream = match supported_config.sample_format() {
            SampleFormat::F32 => build_output_stream::<f32>(
                &device,
                &stream_config,
                sample_rate,
                &queue,
                &stream_failed,
            )?,
            SampleFormat::I16 => build_output_stream::<i16>(
                &device,
                &stream_config,
                sample_rate,
                &queue,
                &stream_failed,
            )?,
            SampleFormat::U16 => build_output_stream::<u16>(
                &device,
                &stream_config,
                sample_rate,
                &queue,
                &stream_failed,
            )?,
            format => {
                return Err(VoiceError::Config(format!(
                    "Unsupported output format: {:?}",
                    format
                )))
            }
        };

        stream.play()?;

        Ok(Self {
            _stream: stream,
            queue,
            input_channels: channels.max(1) as usize,
            max_buffered: (sample_rate * MAX_BUFFERED_SECS) as usize,
            stop,
            stream_failed,
        })
    }

    fn check_stream(&self) -> Result<()> {
        if self.stream_failed.load(Ordering::Acquire) {
            return Err(VoiceError::Stream("Output stream failed".into()));
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl BlockSink for CpalBlockSink {
    fn write_block(&mut self, samples: &[i16]) -> Result<()> {
        self.check_stream()?;

        while lock(&self.queue).len() > self.max_buffered && !self.stopped() {
            thread::sleep(DRAIN_POLL);
            self.check_stream()?;
        }

        // Mix down to mono; the output callback replicates across channels
        let channels = self.input_channels;
        let mut queue = lock(&self.queue);
        queue.extend(samples.chunks(channels).map(|frame| {
            frame.iter().map(|&s| s as f32 / 32768.0).sum::<f32>() / frame.len() as f32
        }));

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        while !lock(&self.queue).is_empty() && !self.stopped() {
            self.check_stream()?;
            thread::sleep(DRAIN_POLL);
        }

        if self.stopped() {
            lock(&self.queue).clear();
        } else {
            // Let the device play out its own buffer
            thread::sleep(Duration::from_millis(100));
        }

        Ok(())
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    input_rate: u32,
    queue: &Arc<Mutex<VecDeque<f32>>>,
    stream_failed: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let output_channels = config.channels.max(1) as usize;
    let step = input_rate as f32 / config.sample_rate.0 as f32;
    let queue = Arc::clone(queue);
    let failed = Arc::clone(stream_failed);
    let mut position: f32 = 0.0;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut queue = lock(&queue);

            for frame in data.chunks_mut(output_channels) {
                // Linear interpolation between neighbouring input samples
                let idx = position.floor() as usize;
                let sample = match (queue.get(idx), queue.get(idx + 1)) {
                    (Some(&a), Some(&b)) => {
                        let fract = position.fract();
                        a * (1.0 - fract) + b * fract
                    }
                    (Some(&a), None) => a,
                    _ => 0.0,
                };

                for channel in frame.iter_mut() {
                    *channel = T::from_sample(sample);
                }

                if idx < queue.len() {
                    position += step;
                }
            }

            let consumed = (position.floor() as usize).min(queue.len());
            queue.drain(..consumed);
            position -= consumed as f32;
        },
        move |err| {
            log::error!("🔊 Output stream error: {}", err);
            failed.store(true, Ordering::Release);
        },
        None,
    )?;

    Ok(stream)
}
