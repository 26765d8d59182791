//! Fixed-size PCM frames.
//!
//! Capture callbacks deliver samples in whatever batch size the host picks;
//! [`FrameAssembler`] re-slices them into frames of exactly one frame period,
//! numbered in capture order and stamped on a sample-accurate timeline.

use std::time::{Duration, Instant};

/// One frame of captured audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// Capture time of the first sample.
    pub timestamp: Instant,
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(sequence: u64, timestamp: Instant, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            timestamp,
            samples,
        }
    }

    /// Duration covered by this frame.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        samples_to_duration(self.samples.len(), sample_rate)
    }

    /// Capture time just after the last sample.
    pub fn end(&self, sample_rate: u32) -> Instant {
        self.timestamp + self.duration(sample_rate)
    }
}

pub(crate) fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((samples as u64).saturating_mul(1_000_000_000) / sample_rate as u64)
}

/// Re-slices arbitrary sample batches into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    next_sequence: u64,
    origin: Option<Instant>,
    emitted_samples: u64,
}

impl FrameAssembler {
    /// Creates an assembler producing frames of `frame_len` samples.
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        Self {
            frame_len: frame_len.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_len.max(1) * 2),
            next_sequence: 0,
            origin: None,
            emitted_samples: 0,
        }
    }

    /// Number of samples per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Appends a batch read at `now` and returns every complete frame.
    ///
    /// The first batch anchors the timeline; later frame timestamps are derived
    /// from the number of samples emitted so far.
    pub fn push(&mut self, samples: &[i16], now: Instant) -> Vec<Frame> {
        if samples.is_empty() {
            return Vec::new();
        }

        let origin = match self.origin {
            Some(origin) => origin,
            None => {
                // Anchor at the capture time of the first sample in this batch.
                let anchored = now
                    .checked_sub(samples_to_duration(samples.len(), self.sample_rate))
                    .unwrap_or(now);
                self.origin = Some(anchored);
                anchored
            }
        };

        self.pending.extend_from_slice(samples);

        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_len);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.frame_len {
            let chunk = self.pending[consumed..consumed + self.frame_len].to_vec();
            consumed += self.frame_len;

            let offset = samples_to_duration(self.emitted_samples as usize, self.sample_rate);
            frames.push(Frame::new(self.next_sequence, origin + offset, chunk));

            self.next_sequence += 1;
            self.emitted_samples += self.frame_len as u64;
        }
        self.pending.drain(..consumed);

        frames
    }

    /// Samples waiting for a complete frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
