//! Speaker output using CPAL.
//!
//! Scheduled chunks live in a small mixer shared with the output callback.
//! The callback never blocks: if the coordinator holds the mixer lock it
//! renders silence for that buffer and the device clock still advances.

use crate::audio::capture::{DeviceKind, SendableStream, resolve_device};
use crate::audio::frame::samples_to_duration;
use crate::audio::output::{AudioOutput, ChunkId};
use crate::error::{ParleyError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MixerChunk {
    id: ChunkId,
    /// Device-rate sample index of the first sample.
    start: u64,
    samples: Vec<f32>,
}

impl MixerChunk {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

struct SpeakerShared {
    mixer: Mutex<Vec<MixerChunk>>,
    /// Device-rate samples rendered since the stream started.
    position: AtomicU64,
    muted: AtomicBool,
    completed: Sender<ChunkId>,
}

impl SpeakerShared {
    fn render<T>(&self, data: &mut [T], channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let channels = channels.max(1);
        let frames = (data.len() / channels) as u64;
        let first = self.position.load(Ordering::Relaxed);

        match self.mixer.try_lock() {
            Ok(mut mixer) => {
                let muted = self.muted.load(Ordering::Relaxed);
                for (offset, frame) in data.chunks_mut(channels).enumerate() {
                    let position = first + offset as u64;
                    let mut value = 0.0f32;
                    for chunk in mixer.iter() {
                        if position >= chunk.start && position < chunk.end() {
                            value += chunk.samples[(position - chunk.start) as usize];
                        }
                    }
                    let value = if muted { 0.0 } else { value.clamp(-1.0, 1.0) };
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(value);
                    }
                }

                let rendered_to = first + frames;
                mixer.retain(|chunk| {
                    if chunk.end() <= rendered_to {
                        let _ = self.completed.send(chunk.id);
                        false
                    } else {
                        true
                    }
                });
                // Advanced under the lock so `schedule` never places a chunk
                // into samples that were already rendered.
                self.position.store(rendered_to, Ordering::Release);
            }
            Err(_) => {
                for sample in data.iter_mut() {
                    *sample = T::EQUILIBRIUM;
                }
                self.position.fetch_add(frames, Ordering::Release);
            }
        }
    }
}

fn to_device_samples(at: Duration, device_rate: u32) -> u64 {
    (at.as_nanos() * device_rate as u128 / 1_000_000_000) as u64
}

/// Maps scheduled start times onto device sample indices.
///
/// A chunk starting at (or within a sample of) the previous chunk's end is
/// placed exactly at that chunk's device end, so resampling each chunk on its
/// own never opens a gap or an overlap. Nothing is placed before the render
/// position.
#[derive(Debug, Default)]
struct Placement {
    tail: Option<u64>,
}

impl Placement {
    fn place(&mut self, start: Duration, device_len: usize, device_rate: u32, position: u64) -> u64 {
        let requested = to_device_samples(start, device_rate);
        let device_start = match self.tail {
            Some(tail) if requested <= tail + 1 => tail,
            _ => requested,
        }
        .max(position);
        self.tail = Some(device_start + device_len as u64);
        device_start
    }

    fn reset(&mut self) {
        self.tail = None;
    }
}

/// Linear interpolation for float PCM.
fn resample_f32(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    (0..output_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(samples.len() - 1);
            let fraction = (position - index as f64) as f32;
            match samples.get(index + 1) {
                Some(&next) => samples[index] + (next - samples[index]) * fraction,
                None => samples[index],
            }
        })
        .collect()
}

/// Live speaker output.
pub struct CpalOutput {
    stream: Mutex<Option<SendableStream>>,
    shared: Arc<SpeakerShared>,
    completed: Receiver<ChunkId>,
    placement: Placement,
    device_rate: u32,
    source_rate: u32,
}

impl CpalOutput {
    /// Open the named output device (or the best default) and start the stream.
    ///
    /// `source_rate` is the rate of the chunks that will be scheduled.
    pub fn open(device_name: Option<&str>, source_rate: u32) -> Result<Self> {
        let device = resolve_device(device_name, DeviceKind::Output)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(SpeakerShared {
            mixer: Mutex::new(Vec::new()),
            position: AtomicU64::new(0),
            muted: AtomicBool::new(false),
            completed: tx,
        });

        let (stream, device_rate) = build_stream(&device, source_rate, &shared)?;
        stream.play().map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::debug!(target: "parley::speaker", device_rate, source_rate, "output stream started");

        Ok(Self {
            stream: Mutex::new(Some(SendableStream(stream))),
            shared,
            completed: rx,
            placement: Placement::default(),
            device_rate,
            source_rate,
        })
    }
}

fn error_callback() -> impl FnMut(cpal::StreamError) + Send + 'static {
    |err| tracing::error!(target: "parley::speaker", error = %err, "output stream error")
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<SpeakerShared>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let shared = Arc::clone(shared);
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.render(data, channels),
        error_callback(),
        None,
    )
}

/// Try mono f32 at the source rate first, then the device's own config.
fn build_stream(
    device: &cpal::Device,
    source_rate: u32,
    shared: &Arc<SpeakerShared>,
) -> Result<(cpal::Stream, u32)> {
    let requested = cpal::StreamConfig {
        channels: 1,
        sample_rate: source_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    if let Ok(stream) = build_typed::<f32>(device, &requested, shared) {
        return Ok((stream, source_rate));
    }

    let native = device
        .default_output_config()
        .map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to query default output config: {}", e),
        })?;
    let rate = native.sample_rate();
    let config: cpal::StreamConfig = native.clone().into();

    tracing::info!(
        target: "parley::speaker",
        channels = config.channels,
        rate,
        format = ?native.sample_format(),
        "using native output format"
    );

    let built = match native.sample_format() {
        cpal::SampleFormat::F32 => build_typed::<f32>(device, &config, shared),
        cpal::SampleFormat::I16 => build_typed::<i16>(device, &config, shared),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, &config, shared),
        other => {
            return Err(ParleyError::Acquisition {
                message: format!("Unsupported output sample format: {:?}", other),
            });
        }
    };

    built
        .map(|stream| (stream, rate))
        .map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to build output stream: {}", e),
        })
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> Duration {
        samples_to_duration(
            self.shared.position.load(Ordering::Acquire) as usize,
            self.device_rate,
        )
    }

    fn sample_rate(&self) -> u32 {
        self.source_rate
    }

    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start: Duration) -> Result<()> {
        let samples = resample_f32(&samples, self.source_rate, self.device_rate);
        let mut mixer = self.shared.mixer.lock().map_err(|e| ParleyError::Other(format!(
            "output mixer poisoned: {}",
            e
        )))?;
        let position = self.shared.position.load(Ordering::Acquire);
        let start = self
            .placement
            .place(start, samples.len(), self.device_rate, position);
        mixer.push(MixerChunk { id, start, samples });
        Ok(())
    }

    fn stop(&mut self, id: ChunkId) {
        self.placement.reset();
        if let Ok(mut mixer) = self.shared.mixer.lock() {
            mixer.retain(|chunk| chunk.id != id);
        }
    }

    fn take_completed(&mut self) -> Vec<ChunkId> {
        self.completed.try_iter().collect()
    }

    fn set_muted(&mut self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    fn close(&mut self) -> Result<()> {
        self.placement.reset();
        if let Ok(mut mixer) = self.shared.mixer.lock() {
            mixer.clear();
        }
        let stream = match self.stream.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            stream.0.pause().map_err(|e| ParleyError::Other(format!(
                "Failed to stop output stream: {}",
                e
            )))?;
        }
        Ok(())
    }
}
