//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::FrameSource;
use crate::audio::wav::resample;
use crate::defaults;
use crate::error::{ParleyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Backend probing (ALSA, JACK, PipeWire) prints harmless noise on fd 2.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device names that route through the desktop sound server.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Device name patterns that are never useful for a conversation.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "hdmi",
    "s/pdif",
    "iec958",
];

pub(crate) fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// A device as shown by `parley devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub recommended: bool,
}

/// List usable input and output devices, dropping surround/HDMI endpoints.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let (inputs, outputs) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        (host.input_devices(), host.output_devices())
    });

    let mut listed = Vec::new();
    let inputs = inputs.map_err(|e| ParleyError::Acquisition {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    let outputs = outputs.map_err(|e| ParleyError::Acquisition {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;

    let tagged = inputs
        .map(|d| (d, DeviceKind::Input))
        .chain(outputs.map(|d| (d, DeviceKind::Output)));
    for (device, kind) in tagged {
        let Ok(name) = device.name() else { continue };
        if should_filter_device(&name) {
            continue;
        }
        listed.push(DeviceInfo {
            recommended: is_preferred_device(&name),
            name,
            kind,
        });
    }

    Ok(listed)
}

/// Resolve a device by exact name, or the best default for the direction.
///
/// The default prefers a sound-server device so the desktop's routing is respected.
pub(crate) fn resolve_device(name: Option<&str>, kind: DeviceKind) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        }
        .map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        let mut preferred = None;
        for device in devices {
            let Ok(device_name) = device.name() else {
                continue;
            };
            match name {
                Some(wanted) if device_name == wanted => return Ok(device),
                None if preferred.is_none() && is_preferred_device(&device_name) => {
                    preferred = Some(device);
                }
                _ => {}
            }
        }

        if let Some(wanted) = name {
            return Err(ParleyError::AudioDeviceNotFound {
                device: wanted.to_string(),
            });
        }

        preferred
            .or_else(|| match kind {
                DeviceKind::Input => host.default_input_device(),
                DeviceKind::Output => host.default_output_device(),
            })
            .ok_or_else(|| ParleyError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched behind the owning source's Mutex.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Processing the host is asked to apply before samples reach us.
///
/// CPAL exposes no portable switch for these, so with this backend they are
/// advisory: they are logged at start so a sound-server filter chain (for
/// example PipeWire's echo-cancel module) can be matched against them, and
/// nothing in parley emulates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHints {
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
        }
    }
}

impl CaptureHints {
    /// Names of the enabled hints, in a fixed order.
    pub fn requested(&self) -> Vec<&'static str> {
        [
            (self.noise_suppression, "noise_suppression"),
            (self.echo_cancellation, "echo_cancellation"),
            (self.auto_gain_control, "auto_gain_control"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect()
    }
}

/// Counters shared between the capture callback and the reader.
#[derive(Debug, Default)]
struct CaptureStatus {
    callbacks: AtomicU64,
    dropped: AtomicU64,
    faulted: AtomicBool,
}

/// Samples converted per `push_slice` call inside the callback.
const WRITE_CHUNK: usize = 256;

/// The callback's half of the capture ring.
///
/// Runs on the audio thread and never locks or allocates: interleaved input
/// is downmixed through a stack buffer, and whatever does not fit in the ring
/// is counted and discarded.
struct CaptureWriter {
    producer: HeapProd<i16>,
    status: Arc<CaptureStatus>,
}

impl CaptureWriter {
    fn write_i16(&mut self, data: &[i16], channels: usize) {
        self.write(data.chunks_exact(channels.max(1)).map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        }));
    }

    fn write_f32(&mut self, data: &[f32], channels: usize) {
        self.write(data.chunks_exact(channels.max(1)).map(|frame| {
            let sum: f32 = frame.iter().sum();
            f32_to_i16(sum / frame.len() as f32)
        }));
    }

    fn write(&mut self, samples: impl Iterator<Item = i16>) {
        self.status.callbacks.fetch_add(1, Ordering::Relaxed);
        let mut chunk = [0i16; WRITE_CHUNK];
        let mut len = 0;
        let mut dropped = 0;
        for sample in samples {
            chunk[len] = sample;
            len += 1;
            if len == WRITE_CHUNK {
                dropped += len - self.producer.push_slice(&chunk);
                len = 0;
            }
        }
        dropped += len - self.producer.push_slice(&chunk[..len]);
        if dropped > 0 {
            self.status.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }
}

/// The reader's half: mono PCM at `rate`, which is the device rate when the
/// stream runs in its native config.
struct CaptureReader {
    consumer: HeapCons<i16>,
    rate: u32,
}

fn capture_ring(
    rate: u32,
    capacity: usize,
    status: &Arc<CaptureStatus>,
) -> (CaptureWriter, CaptureReader) {
    let (producer, consumer) = HeapRb::<i16>::new(capacity.max(WRITE_CHUNK)).split();
    (
        CaptureWriter {
            producer,
            status: Arc::clone(status),
        },
        CaptureReader { consumer, rate },
    )
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Live microphone source producing 16-bit mono PCM at the requested rate.
///
/// Tries the requested format first (i16, then f32), then falls back to the
/// device's native config; the callback only downmixes, and resampling to the
/// requested rate happens in `read_samples`.
pub struct CpalFrameSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    reader: Option<CaptureReader>,
    status: Arc<CaptureStatus>,
    sample_rate: u32,
    hints: CaptureHints,
}

impl CpalFrameSource {
    /// Open the named input device (or the best default).
    ///
    /// # Errors
    /// `AudioDeviceNotFound` if the device does not exist.
    pub fn new(device_name: Option<&str>, sample_rate: u32, hints: CaptureHints) -> Result<Self> {
        let device = resolve_device(device_name, DeviceKind::Input)?;
        Ok(Self {
            device,
            stream: Mutex::new(None),
            reader: None,
            status: Arc::new(CaptureStatus::default()),
            sample_rate,
            hints,
        })
    }

    fn ring(&self, rate: u32) -> (CaptureWriter, CaptureReader) {
        let capacity = (rate as u64 * defaults::CAPTURE_RING_MS as u64 / 1000) as usize;
        capture_ring(rate, capacity, &self.status)
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let status = Arc::clone(&self.status);
        move |err| {
            tracing::error!(target: "parley::capture", error = %err, "input stream error");
            status.faulted.store(true, Ordering::SeqCst);
        }
    }

    fn build_stream(&self) -> Result<(cpal::Stream, CaptureReader)> {
        let requested = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (mut writer, reader) = self.ring(self.sample_rate);
        if let Ok(stream) = self.device.build_input_stream(
            &requested,
            move |data: &[i16], _: &cpal::InputCallbackInfo| writer.write_i16(data, 1),
            self.error_callback(),
            None,
        ) {
            return Ok((stream, reader));
        }

        let (mut writer, reader) = self.ring(self.sample_rate);
        if let Ok(stream) = self.device.build_input_stream(
            &requested,
            move |data: &[f32], _: &cpal::InputCallbackInfo| writer.write_f32(data, 1),
            self.error_callback(),
            None,
        ) {
            return Ok((stream, reader));
        }

        self.build_native_stream()
    }

    /// Capture at the device's own config; the reader resamples.
    fn build_native_stream(&self) -> Result<(cpal::Stream, CaptureReader)> {
        use cpal::SampleFormat;

        let native = self
            .device
            .default_input_config()
            .map_err(|e| ParleyError::Acquisition {
                message: format!("Failed to query default input config: {}", e),
            })?;

        let native_rate = native.sample_rate();
        let channels = native.channels() as usize;
        let config: cpal::StreamConfig = native.clone().into();

        tracing::info!(
            target: "parley::capture",
            channels,
            native_rate,
            format = ?native.sample_format(),
            "using native input format, converting in software"
        );

        let (mut writer, reader) = self.ring(native_rate);
        let built = match native.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| writer.write_i16(data, channels),
                self.error_callback(),
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| writer.write_f32(data, channels),
                self.error_callback(),
                None,
            ),
            other => {
                return Err(ParleyError::Acquisition {
                    message: format!(
                        "Unsupported native sample format: {:?}. Pick another device with --device.",
                        other
                    ),
                });
            }
        };

        let stream = built.map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to build native input stream: {}", e),
        })?;
        Ok((stream, reader))
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| ParleyError::Capture {
            message: format!("Failed to lock stream: {}", e),
        })
    }
}

impl FrameSource for CpalFrameSource {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        let requested = self.hints.requested();
        if !requested.is_empty() {
            tracing::info!(
                target: "parley::capture",
                hints = ?requested,
                "host input processing is advisory with cpal; configure it in the sound server"
            );
        }

        self.status.faulted.store(false, Ordering::SeqCst);
        self.status.callbacks.store(0, Ordering::Relaxed);
        self.status.dropped.store(0, Ordering::Relaxed);
        let (stream, reader) = self.build_stream()?;
        stream.play().map_err(|e| ParleyError::Acquisition {
            message: format!("Failed to start input stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept a non-native config but never call back.
        std::thread::sleep(Duration::from_millis(200));

        let (stream, reader) = if self.status.callbacks.load(Ordering::Relaxed) == 0 {
            drop(stream);
            let (native, reader) = self.build_native_stream()?;
            native.play().map_err(|e| ParleyError::Acquisition {
                message: format!("Failed to start native input stream: {}", e),
            })?;
            (native, reader)
        } else {
            (stream, reader)
        };

        self.reader = Some(reader);
        *self.lock_stream()? = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.reader = None;
        if let Some(stream) = self.lock_stream()?.take() {
            stream.0.pause().map_err(|e| ParleyError::Capture {
                message: format!("Failed to stop input stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.status.faulted.load(Ordering::SeqCst) {
            return Err(ParleyError::Capture {
                message: "input stream reported an error".to_string(),
            });
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let dropped = self.status.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(target: "parley::capture", dropped, "capture ring full, samples dropped");
        }

        let samples: Vec<i16> = reader.consumer.pop_iter().collect();
        if reader.rate == self.sample_rate || samples.is_empty() {
            Ok(samples)
        } else {
            Ok(resample(&samples, reader.rate, self.sample_rate))
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("iec958:CARD=PCH"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    fn ring(capacity: usize) -> (CaptureWriter, CaptureReader, Arc<CaptureStatus>) {
        let status = Arc::new(CaptureStatus::default());
        let (writer, reader) = capture_ring(16000, capacity, &status);
        (writer, reader, status)
    }

    #[test]
    fn test_writer_downmixes_stereo() {
        let (mut writer, mut reader, status) = ring(1024);
        writer.write_i16(&[100, 300, -200, 200, 1000, 0], 2);
        assert_eq!(reader.consumer.pop_iter().collect::<Vec<_>>(), vec![200, 0, 500]);
        assert_eq!(status.callbacks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_writer_converts_f32_in_place() {
        let (mut writer, mut reader, _status) = ring(1024);
        writer.write_f32(&[0.5, -2.0, 0.25, 0.75], 1);
        writer.write_f32(&[0.5, -0.5], 2);
        let samples: Vec<i16> = reader.consumer.pop_iter().collect();
        assert_eq!(
            samples,
            vec![
                f32_to_i16(0.5),
                -i16::MAX,
                f32_to_i16(0.25),
                f32_to_i16(0.75),
                0
            ]
        );
    }

    #[test]
    fn test_writer_keeps_order_across_chunks() {
        let (mut writer, mut reader, _status) = ring(4096);
        let input: Vec<i16> = (0..1000).collect();
        writer.write_i16(&input, 1);
        assert_eq!(reader.consumer.pop_iter().collect::<Vec<_>>(), input);
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let (mut writer, mut reader, status) = ring(WRITE_CHUNK);
        let input = vec![7i16; WRITE_CHUNK + 100];
        writer.write_i16(&input, 1);
        writer.write_i16(&[1, 2, 3], 1);

        assert_eq!(status.dropped.load(Ordering::Relaxed), 103);
        assert_eq!(reader.consumer.pop_iter().count(), WRITE_CHUNK);

        writer.write_i16(&[1, 2, 3], 1);
        assert_eq!(reader.consumer.pop_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(status.dropped.load(Ordering::Relaxed), 103);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_capture_hints_default_to_enabled() {
        let hints = CaptureHints::default();
        assert_eq!(
            hints.requested(),
            vec!["noise_suppression", "echo_cancellation", "auto_gain_control"]
        );
    }

    #[test]
    fn test_capture_hints_list_only_enabled() {
        let hints = CaptureHints {
            noise_suppression: false,
            echo_cancellation: true,
            auto_gain_control: false,
        };
        assert_eq!(hints.requested(), vec!["echo_cancellation"]);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        let source = CpalFrameSource::new(
            Some("NonExistentDevice12345"),
            16000,
            CaptureHints::default(),
        );
        match source {
            Err(ParleyError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            // Hosts without any audio backend fail enumeration instead.
            Err(ParleyError::Acquisition { .. }) => {}
            Err(other) => panic!("Expected AudioDeviceNotFound error, got {other}"),
            Ok(_) => panic!("Expected AudioDeviceNotFound error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_read_stop() {
        let mut source = CpalFrameSource::new(None, 16000, CaptureHints::default())
            .expect("Failed to create audio source");
        source.start().expect("start");
        std::thread::sleep(Duration::from_millis(100));
        assert!(source.read_samples().is_ok());
        source.stop().expect("stop");
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_filters_surround() {
        let devices = list_devices().expect("Failed to list devices");
        for device in &devices {
            assert!(!device.name.to_lowercase().contains("surround"));
        }
    }
}
