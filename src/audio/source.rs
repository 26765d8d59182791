use crate::defaults;
use crate::error::{ParleyError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for microphone-like sample sources.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait FrameSource: Send {
    /// Acquire the device and begin capturing.
    fn start(&mut self) -> Result<()>;

    /// Release the device.
    fn stop(&mut self) -> Result<()>;

    /// Drain samples captured since the last read (16-bit PCM, mono).
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Sample rate of the returned samples.
    fn sample_rate(&self) -> u32 {
        defaults::INPUT_SAMPLE_RATE
    }

    /// Whether the source ends on its own (file replay) rather than running until stopped.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Observable lifecycle of a [`MockFrameSource`], shared after the source is moved.
#[derive(Debug, Clone, Default)]
pub struct MockSourceMonitor {
    started: Arc<AtomicBool>,
    stop_calls: Arc<AtomicUsize>,
}

impl MockSourceMonitor {
    /// Whether the source is currently started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// How many times `stop` was called.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

/// Scripted source for tests: returns queued batches, then silence or EOF.
#[derive(Debug, Clone)]
pub struct MockFrameSource {
    batches: VecDeque<Vec<i16>>,
    idle_batch: Vec<i16>,
    finite: bool,
    should_fail_start: bool,
    fail_read_after: Option<usize>,
    reads: usize,
    error_message: String,
    monitor: MockSourceMonitor,
}

impl MockFrameSource {
    /// Create a new mock that returns short silent batches forever.
    pub fn new() -> Self {
        Self {
            batches: VecDeque::new(),
            idle_batch: vec![0i16; 160],
            finite: false,
            should_fail_start: false,
            fail_read_after: None,
            reads: 0,
            error_message: "mock audio error".to_string(),
            monitor: MockSourceMonitor::default(),
        }
    }

    /// Queue batches returned in order before falling back to the idle batch.
    pub fn with_batches(mut self, batches: Vec<Vec<i16>>) -> Self {
        self.batches = batches.into();
        self
    }

    /// Return empty reads (EOF) once the queued batches are exhausted.
    pub fn finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail every read after `reads` successful ones
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle for observing start/stop after the source has been moved.
    pub fn monitor(&self) -> MockSourceMonitor {
        self.monitor.clone()
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for MockFrameSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(ParleyError::Acquisition {
                message: self.error_message.clone(),
            });
        }
        self.monitor.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.monitor.started.store(false, Ordering::SeqCst);
        self.monitor.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if let Some(limit) = self.fail_read_after
            && self.reads >= limit
        {
            return Err(ParleyError::Capture {
                message: self.error_message.clone(),
            });
        }
        self.reads += 1;

        match self.batches.pop_front() {
            Some(batch) => Ok(batch),
            None if self.finite => Ok(Vec::new()),
            None => Ok(self.idle_batch.clone()),
        }
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_returns_batches_in_order() {
        let mut source = MockFrameSource::new().with_batches(vec![vec![1, 2], vec![3]]);
        assert_eq!(source.read_samples().unwrap(), vec![1, 2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
        assert_eq!(source.read_samples().unwrap().len(), 160);
    }

    #[test]
    fn test_finite_mock_reports_eof() {
        let mut source = MockFrameSource::new().with_batches(vec![vec![5]]).finite();
        assert!(source.is_finite());
        assert_eq!(source.read_samples().unwrap(), vec![5]);
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_start_failure_is_acquisition_error() {
        let mut source = MockFrameSource::new()
            .with_start_failure()
            .with_error_message("permission denied");
        match source.start() {
            Err(ParleyError::Acquisition { message }) => assert_eq!(message, "permission denied"),
            other => panic!("expected acquisition error, got {:?}", other),
        }
        assert!(!source.monitor().is_started());
    }

    #[test]
    fn test_read_failure_after_n_reads() {
        let mut source = MockFrameSource::new().with_read_failure_after(1);
        assert!(source.read_samples().is_ok());
        assert!(matches!(
            source.read_samples(),
            Err(ParleyError::Capture { .. })
        ));
    }

    #[test]
    fn test_monitor_tracks_lifecycle() {
        let mut source = MockFrameSource::new();
        let monitor = source.monitor();

        source.start().unwrap();
        assert!(monitor.is_started());
        source.stop().unwrap();
        assert!(!monitor.is_started());
        assert_eq!(monitor.stop_calls(), 1);
    }
}
