//! Audio output device abstraction.
//!
//! An output accepts decoded PCM with a start time on its own clock and
//! reports chunks that finished playing. The device clock is a [`Duration`]
//! since the device was opened.

use crate::clock::Clock;
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Identifies one scheduled chunk for the lifetime of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

/// Trait for speaker-like sinks.
///
/// Implementations must be cheap to call from the coordinator thread; any
/// blocking work belongs on the device's own callback thread.
pub trait AudioOutput: Send {
    /// Current position of the device clock.
    fn now(&self) -> Duration;

    /// Sample rate the scheduled samples are expressed in.
    fn sample_rate(&self) -> u32;

    /// Play `samples` starting at `start` on the device clock.
    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start: Duration) -> Result<()>;

    /// Stop one chunk, whether playing or still pending.
    fn stop(&mut self, id: ChunkId);

    /// Chunks that ended naturally since the last call.
    fn take_completed(&mut self) -> Vec<ChunkId>;

    /// Output gain 0 or 1; the timeline keeps advancing while muted.
    fn set_muted(&mut self, muted: bool);

    /// Release the device. Later calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// What a [`VirtualOutput`] did, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualChunk {
    pub id: ChunkId,
    pub start: Duration,
    pub duration: Duration,
    pub samples: usize,
    pub stopped_at: Option<Duration>,
}

#[derive(Debug, Default)]
struct VirtualState {
    chunks: Vec<VirtualChunk>,
    completed_reported: Vec<ChunkId>,
    muted: bool,
    closed: bool,
}

/// Output device without hardware, driven by a [`Clock`].
///
/// Chunks "play" purely by the passage of clock time. Clones share state so a
/// test can keep a handle after moving the output into an engine.
#[derive(Clone)]
pub struct VirtualOutput {
    clock: Arc<dyn Clock>,
    origin: Instant,
    sample_rate: u32,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(clock: Arc<dyn Clock>, sample_rate: u32) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            sample_rate,
            state: Arc::new(Mutex::new(VirtualState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, VirtualState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every chunk ever scheduled, in scheduling order.
    pub fn chunks(&self) -> Vec<VirtualChunk> {
        self.state().chunks.clone()
    }

    /// Chunks audible at the current clock position.
    pub fn playing(&self) -> Vec<ChunkId> {
        let now = self.now();
        self.state()
            .chunks
            .iter()
            .filter(|c| c.stopped_at.is_none() && c.start <= now && now < c.start + c.duration)
            .map(|c| c.id)
            .collect()
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl AudioOutput for VirtualOutput {
    fn now(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.origin)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start: Duration) -> Result<()> {
        let duration = crate::audio::frame::samples_to_duration(samples.len(), self.sample_rate);
        self.state().chunks.push(VirtualChunk {
            id,
            start,
            duration,
            samples: samples.len(),
            stopped_at: None,
        });
        Ok(())
    }

    fn stop(&mut self, id: ChunkId) {
        let now = self.now();
        let mut state = self.state();
        if let Some(chunk) = state
            .chunks
            .iter_mut()
            .find(|c| c.id == id && c.stopped_at.is_none())
        {
            chunk.stopped_at = Some(now);
        }
    }

    fn take_completed(&mut self) -> Vec<ChunkId> {
        let now = self.now();
        let mut state = self.state();
        let finished: Vec<ChunkId> = state
            .chunks
            .iter()
            .filter(|c| c.stopped_at.is_none() && c.start + c.duration <= now)
            .map(|c| c.id)
            .filter(|id| !state.completed_reported.contains(id))
            .collect();
        state.completed_reported.extend(finished.iter().copied());
        finished
    }

    fn set_muted(&mut self, muted: bool) {
        self.state().muted = muted;
    }

    fn close(&mut self) -> Result<()> {
        let now = self.now();
        let mut state = self.state();
        for chunk in state.chunks.iter_mut().filter(|c| c.stopped_at.is_none()) {
            if now < chunk.start + chunk.duration {
                chunk.stopped_at = Some(now);
            }
        }
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn output() -> (ManualClock, VirtualOutput) {
        let clock = ManualClock::new();
        let output = VirtualOutput::new(Arc::new(clock.clone()), 24000);
        (clock, output)
    }

    #[test]
    fn clock_starts_at_zero() {
        let (clock, output) = output();
        assert_eq!(output.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(40));
        assert_eq!(output.now(), Duration::from_millis(40));
    }

    #[test]
    fn chunk_completes_after_its_duration() {
        let (clock, mut output) = output();
        output
            .schedule(ChunkId(1), vec![0.0; 2400], Duration::ZERO)
            .unwrap();

        clock.advance(Duration::from_millis(50));
        assert_eq!(output.playing(), vec![ChunkId(1)]);
        assert!(output.take_completed().is_empty());

        clock.advance(Duration::from_millis(50));
        assert_eq!(output.take_completed(), vec![ChunkId(1)]);
        assert!(output.take_completed().is_empty());
    }

    #[test]
    fn stopped_chunk_never_completes() {
        let (clock, mut output) = output();
        output
            .schedule(ChunkId(1), vec![0.0; 2400], Duration::ZERO)
            .unwrap();
        output.stop(ChunkId(1));

        clock.advance(Duration::from_millis(200));
        assert!(output.take_completed().is_empty());
        assert_eq!(output.chunks()[0].stopped_at, Some(Duration::ZERO));
    }

    #[test]
    fn mute_and_close_are_recorded() {
        let (_clock, mut output) = output();
        output.set_muted(true);
        assert!(output.is_muted());
        output.close().unwrap();
        assert!(output.is_closed());
    }
}
