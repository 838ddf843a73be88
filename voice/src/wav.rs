use crate::error::{Result, VoiceError};
use crate::types::CHANNELS;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Encode mono 16-bit PCM samples as a complete WAV file in memory
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        let mut samples_writer = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            samples_writer.write_sample(sample);
        }
        samples_writer.flush()?;
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Open a WAV file for playback, accepting only 16-bit integer PCM
pub fn open_wav(path: &Path) -> Result<WavReader<BufReader<File>>> {
    if !path.is_file() {
        return Err(VoiceError::FileNotFound(path.to_path_buf()));
    }

    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(VoiceError::UnsupportedFormat(format!(
            "{}-bit {:?} samples (only 16-bit PCM can be played)",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_encoded_wav_is_readable() {
        let samples: Vec<i16> = (0..2048).map(|i| (i * 7) as i16).collect();
        let bytes = encode_wav(&samples, 44_100).unwrap();

        assert_eq!(bytes.len(), 44 + samples.len() * 2);
        assert_eq!(&bytes[0..4], b"RIFF");

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);

        let decoded: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let result = open_wav(&dir.path().join("nope.wav"));
        assert!(matches!(result, Err(VoiceError::FileNotFound(_))));
    }

    #[test]
    fn test_open_rejects_8_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eight.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..100 {
            writer.write_sample(i as i8).unwrap();
        }
        writer.finalize().unwrap();

        assert!(matches!(
            open_wav(&path),
            Err(VoiceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_open_rejects_float() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            open_wav(&path),
            Err(VoiceError::UnsupportedFormat(_))
        ));
    }
}
