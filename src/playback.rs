//! Gapless playback scheduling.
//!
//! Incoming chunks are laid end to end on the output device's clock. A chunk
//! starts at `max(now, next_free_slot)` and pushes the slot forward by its
//! own duration, so arrival jitter never produces gaps or overlaps.

use crate::audio::codec::decode_pcm16le;
use crate::audio::frame::samples_to_duration;
use crate::audio::output::{AudioOutput, ChunkId};
use crate::error::{ParleyError, Result};
use std::time::Duration;

/// A chunk owned by the scheduler until it finishes or is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledChunk {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    live: Vec<ScheduledChunk>,
    next_free_slot: Duration,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let next_free_slot = output.now();
        Self {
            output,
            live: Vec::new(),
            next_free_slot,
            next_id: 0,
        }
    }

    /// Decode a PCM16LE payload and schedule it.
    ///
    /// # Errors
    /// `Decode` if the payload is malformed; nothing is scheduled and the
    /// timeline is untouched.
    pub fn enqueue(&mut self, payload: &[u8]) -> Result<ScheduledChunk> {
        let samples = decode_pcm16le(payload)?;
        self.enqueue_samples(samples)
    }

    /// Schedule already-decoded samples right after whatever is queued.
    pub fn enqueue_samples(&mut self, samples: Vec<f32>) -> Result<ScheduledChunk> {
        if samples.is_empty() {
            return Err(ParleyError::Decode {
                message: "empty audio chunk".to_string(),
            });
        }

        let now = self.output.now();
        let start = self.next_free_slot.max(now);
        let duration = samples_to_duration(samples.len(), self.output.sample_rate());
        let id = ChunkId(self.next_id);
        self.next_id += 1;

        self.output.schedule(id, samples, start)?;

        let chunk = ScheduledChunk {
            id,
            start,
            duration,
        };
        self.next_free_slot = chunk.end();
        self.live.push(chunk);

        tracing::trace!(
            target: "parley::playback",
            id = id.0,
            start_ms = start.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            "chunk scheduled"
        );
        Ok(chunk)
    }

    /// Stop everything playing or pending and reset the slot to now.
    ///
    /// Returns how many chunks were stopped.
    pub fn flush(&mut self) -> usize {
        let now = self.output.now();
        let stopped = self.live.len();
        for chunk in self.live.drain(..) {
            self.output.stop(chunk.id);
        }
        self.next_free_slot = now;
        if stopped > 0 {
            tracing::debug!(target: "parley::playback", stopped, "playback flushed");
        }
        stopped
    }

    /// Drop chunks the device reported finished or whose end has passed.
    ///
    /// Returns how many chunks were removed.
    pub fn reap(&mut self) -> usize {
        let completed = self.output.take_completed();
        let now = self.output.now();
        let before = self.live.len();
        self.live
            .retain(|chunk| !completed.contains(&chunk.id) && chunk.end() > now);
        before - self.live.len()
    }

    /// Whether anything is still queued or audible.
    pub fn is_busy(&self) -> bool {
        !self.live.is_empty() || self.next_free_slot > self.output.now()
    }

    pub fn next_free_slot(&self) -> Duration {
        self.next_free_slot
    }

    /// Current position of the output device clock.
    pub fn now(&self) -> Duration {
        self.output.now()
    }

    pub fn live(&self) -> &[ScheduledChunk] {
        &self.live
    }

    pub fn set_output_muted(&mut self, muted: bool) {
        self.output.set_muted(muted);
    }

    /// Flush and release the output device.
    pub fn close(&mut self) -> Result<()> {
        self.flush();
        self.output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{decode_base64, encode_chunk};
    use crate::audio::output::VirtualOutput;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn scheduler() -> (ManualClock, VirtualOutput, PlaybackScheduler) {
        let clock = ManualClock::new();
        let output = VirtualOutput::new(Arc::new(clock.clone()), 24000);
        let scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        (clock, output, scheduler)
    }

    fn ms_of_audio(ms: usize) -> Vec<f32> {
        vec![0.1; 24 * ms]
    }

    #[test]
    fn consecutive_chunks_never_overlap() {
        let (clock, _output, mut scheduler) = scheduler();

        let first = scheduler.enqueue_samples(ms_of_audio(100)).unwrap();
        clock.advance(Duration::from_millis(30));
        let second = scheduler.enqueue_samples(ms_of_audio(60)).unwrap();

        assert_eq!(first.start, Duration::ZERO);
        assert_eq!(second.start, first.start + first.duration);
        assert_eq!(scheduler.next_free_slot(), Duration::from_millis(160));
    }

    #[test]
    fn late_chunk_starts_now_not_in_the_past() {
        let (clock, _output, mut scheduler) = scheduler();

        scheduler.enqueue_samples(ms_of_audio(50)).unwrap();
        clock.advance(Duration::from_millis(200));
        let late = scheduler.enqueue_samples(ms_of_audio(50)).unwrap();

        assert_eq!(late.start, Duration::from_millis(200));
    }

    #[test]
    fn flush_then_enqueue_starts_at_now() {
        let (clock, output, mut scheduler) = scheduler();

        scheduler.enqueue_samples(ms_of_audio(500)).unwrap();
        scheduler.enqueue_samples(ms_of_audio(500)).unwrap();
        clock.advance(Duration::from_millis(100));

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(scheduler.next_free_slot(), Duration::from_millis(100));
        assert!(output.playing().is_empty());

        let after = scheduler.enqueue_samples(ms_of_audio(50)).unwrap();
        assert_eq!(after.start, Duration::from_millis(100));
    }

    #[test]
    fn flush_is_idempotent() {
        let (_clock, _output, mut scheduler) = scheduler();
        scheduler.enqueue_samples(ms_of_audio(50)).unwrap();
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(scheduler.flush(), 0);
        assert!(!scheduler.is_busy());
    }

    #[test]
    fn finished_chunks_are_reaped() {
        let (clock, _output, mut scheduler) = scheduler();
        scheduler.enqueue_samples(ms_of_audio(100)).unwrap();
        scheduler.enqueue_samples(ms_of_audio(100)).unwrap();

        clock.advance(Duration::from_millis(150));
        assert_eq!(scheduler.reap(), 1);
        assert!(scheduler.is_busy());

        clock.advance(Duration::from_millis(50));
        assert_eq!(scheduler.reap(), 1);
        assert!(!scheduler.is_busy());
    }

    #[test]
    fn bad_payload_leaves_timeline_untouched() {
        let (_clock, _output, mut scheduler) = scheduler();
        scheduler.enqueue_samples(ms_of_audio(100)).unwrap();
        let slot = scheduler.next_free_slot();

        assert!(matches!(
            scheduler.enqueue(&[1, 2, 3]),
            Err(ParleyError::Decode { .. })
        ));
        assert!(matches!(
            scheduler.enqueue(&[]),
            Err(ParleyError::Decode { .. })
        ));
        assert_eq!(scheduler.next_free_slot(), slot);
        assert_eq!(scheduler.live().len(), 1);
    }

    #[test]
    fn enqueue_decodes_payload() {
        let (_clock, output, mut scheduler) = scheduler();
        let payload = decode_base64(&encode_chunk(&ms_of_audio(20))).unwrap();
        let chunk = scheduler.enqueue(&payload).unwrap();
        assert_eq!(chunk.duration, Duration::from_millis(20));
        assert_eq!(output.chunks().len(), 1);
    }

    #[test]
    fn close_releases_output() {
        let (_clock, output, mut scheduler) = scheduler();
        scheduler.enqueue_samples(ms_of_audio(100)).unwrap();
        scheduler.close().unwrap();
        assert!(output.is_closed());
        assert!(scheduler.live().is_empty());
    }
}
