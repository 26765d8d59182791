//! WAV file replay, used by `parley analyze` and for feeding recorded speech
//! through the turn machinery.

use crate::audio::source::FrameSource;
use crate::error::{ParleyError, Result};
use std::io::Read;
use std::path::Path;

/// Frame source backed by a decoded WAV file.
///
/// Any channel count and sample rate is accepted; samples are downmixed to
/// mono and resampled to the target rate up front.
pub struct WavFrameSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
}

impl WavFrameSource {
    /// Decode WAV data from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader).map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

        let spec = wav.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample <= 16 => wav
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                wav.samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect()
            }
            hound::SampleFormat::Float => wav
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect(),
        }
        .map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono: Vec<i16> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        let samples = resample(&mono, spec.sample_rate, target_rate);

        tracing::debug!(
            target: "parley::wav",
            source_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "decoded wav input"
        );

        Ok(Self {
            samples,
            position: 0,
            chunk_size: (target_rate / 100).max(1) as usize,
            sample_rate: target_rate,
        })
    }

    /// Decode a WAV file from disk.
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), target_rate)
    }

    /// Decode WAV data piped on stdin.
    pub fn from_stdin(target_rate: u32) -> Result<Self> {
        // StdinLock is not Send; buffer everything first.
        let mut buffer = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .map_err(|e| ParleyError::Acquisition {
                message: format!("Failed to read from stdin: {}", e),
            })?;
        Self::from_reader(Box::new(std::io::Cursor::new(buffer)), target_rate)
    }

    /// Change how many samples each read returns.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Total decoded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FrameSource for WavFrameSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(samples.len() - 1);
            let fraction = position - index as f64;

            match samples.get(index + 1) {
                Some(&next) => {
                    let current = samples[index] as f64;
                    (current + (next as f64 - current) * fraction) as i16
                }
                None => samples[index],
            }
        })
        .collect()
}
