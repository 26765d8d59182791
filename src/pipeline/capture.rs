//! Microphone polling loop.
//!
//! Drains the [`FrameSource`] at roughly the frame period, slices what it
//! gets into fixed frames and pushes them downstream without blocking. The
//! source is always stopped when the loop exits.

use crate::audio::frame::{Frame, FrameAssembler, samples_to_duration};
use crate::audio::source::FrameSource;
use crate::clock::Clock;
use crate::error::ParleyError;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Why a capture loop stopped.
#[derive(Debug)]
pub enum CaptureExit {
    /// `running` was cleared or the consumer went away.
    Stopped,
    /// A finite source ran out of samples.
    Exhausted,
    /// Reading from the device failed.
    Faulted(ParleyError),
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    assembler: FrameAssembler,
    clock: Arc<dyn Clock>,
    poll: Duration,
    dropped: u64,
}

impl CaptureLoop {
    /// `source` must already be started.
    pub fn new(source: Box<dyn FrameSource>, frame_len: usize, clock: Arc<dyn Clock>) -> Self {
        let sample_rate = source.sample_rate();
        let poll = samples_to_duration(frame_len, sample_rate).max(Duration::from_millis(1));
        Self {
            source,
            assembler: FrameAssembler::new(frame_len, sample_rate),
            clock,
            poll,
            dropped: 0,
        }
    }

    /// Polls until stopped, exhausted or faulted, then stops the source.
    pub fn run(mut self, frames: Sender<Frame>, running: &AtomicBool) -> CaptureExit {
        let exit = self.poll_until_exit(&frames, running);

        if let Err(e) = self.source.stop() {
            tracing::warn!(target: "parley::capture", error = %e, "failed to stop source");
        }
        tracing::debug!(
            target: "parley::capture",
            dropped = self.dropped,
            exit = ?exit,
            "capture stopped"
        );
        exit
    }

    fn poll_until_exit(&mut self, frames: &Sender<Frame>, running: &AtomicBool) -> CaptureExit {
        while running.load(Ordering::SeqCst) {
            let samples = match self.source.read_samples() {
                Ok(samples) => samples,
                Err(e) => return CaptureExit::Faulted(e),
            };

            if samples.is_empty() {
                if self.source.is_finite() {
                    return CaptureExit::Exhausted;
                }
                thread::sleep(self.poll);
                continue;
            }

            for frame in self.assembler.push(&samples, self.clock.now()) {
                match frames.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        if self.dropped == 0 {
                            tracing::warn!(target: "parley::capture", "frame queue full, dropping frames");
                        }
                        self.dropped += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => return CaptureExit::Stopped,
                }
            }

            thread::sleep(self.poll);
        }
        CaptureExit::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MockFrameSource;
    use crate::clock::SystemClock;

    fn started(mut source: MockFrameSource) -> Box<dyn FrameSource> {
        source.start().unwrap();
        Box::new(source)
    }

    #[test]
    fn finite_source_is_framed_then_exhausted() {
        let source = MockFrameSource::new()
            .with_batches(vec![vec![1; 100], vec![2; 100], vec![3; 120]])
            .finite();
        let monitor = source.monitor();
        let (tx, rx) = crossbeam_channel::bounded(16);
        let running = AtomicBool::new(true);

        let exit = CaptureLoop::new(started(source), 160, Arc::new(SystemClock)).run(tx, &running);

        assert!(matches!(exit, CaptureExit::Exhausted));
        let frames: Vec<Frame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].samples.len(), 160);
        assert!(!monitor.is_started());
        assert_eq!(monitor.stop_calls(), 1);
    }

    #[test]
    fn read_failure_reports_fault_and_stops_source() {
        let source = MockFrameSource::new()
            .with_read_failure_after(2)
            .with_error_message("device unplugged");
        let monitor = source.monitor();
        let (tx, _rx) = crossbeam_channel::bounded(16);
        let running = AtomicBool::new(true);

        let exit = CaptureLoop::new(started(source), 160, Arc::new(SystemClock)).run(tx, &running);

        match exit {
            CaptureExit::Faulted(ParleyError::Capture { message }) => {
                assert_eq!(message, "device unplugged")
            }
            other => panic!("expected capture fault, got {:?}", other),
        }
        assert!(!monitor.is_started());
    }

    #[test]
    fn cleared_flag_stops_loop() {
        let source = MockFrameSource::new();
        let monitor = source.monitor();
        let (tx, rx) = crossbeam_channel::bounded(1024);
        let running = Arc::new(AtomicBool::new(true));

        let loop_running = running.clone();
        let capture = CaptureLoop::new(started(source), 160, Arc::new(SystemClock));
        let handle = thread::spawn(move || capture.run(tx, &loop_running));

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.samples.len(), 160);
        running.store(false, Ordering::SeqCst);

        let exit = handle.join().unwrap();
        assert!(matches!(exit, CaptureExit::Stopped));
        assert!(!monitor.is_started());
    }

    #[test]
    fn dropped_consumer_stops_loop() {
        let source = MockFrameSource::new();
        let (tx, rx) = crossbeam_channel::bounded(4);
        drop(rx);
        let running = AtomicBool::new(true);

        let exit = CaptureLoop::new(started(source), 160, Arc::new(SystemClock)).run(tx, &running);
        assert!(matches!(exit, CaptureExit::Stopped));
    }
}
