//! Station abstraction and runner.
//!
//! Each stage of the audio path (VAD scoring, uplink sending) is a
//! [`Station`] running on its own thread, connected to its neighbours by
//! bounded channels. A station stops when its input closes, its output closes,
//! or it returns a fatal error.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Processes one input.
    ///
    /// `Ok(None)` consumes the input without forwarding anything.
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    fn name(&self) -> &'static str;

    /// Called once when the loop exits, whatever the reason.
    fn shutdown(&mut self) {}
}

/// Runs a station on a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns `station` reading from `input_rx` and writing to `output_tx`.
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::spawn(move || {
            Self::run_station(&mut station, input_rx, output_tx, error_reporter);
        });

        Self {
            handle: Some(handle),
            station_name,
            _phantom: PhantomData,
        }
    }

    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) {
        let station_name = station.name();
        tracing::debug!(target: "parley::station", station = station_name, "started");

        while let Ok(input) = input_rx.recv() {
            match station.process(input) {
                Ok(Some(output)) => {
                    if output_tx.send(output).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error @ StationError::Recoverable(_)) => {
                    error_reporter.report(station_name, &error);
                }
                Err(error @ StationError::Fatal(_)) => {
                    error_reporter.report(station_name, &error);
                    break;
                }
            }
        }

        station.shutdown();
        tracing::debug!(target: "parley::station", station = station_name, "stopped");
    }

    /// Waits for the station thread to finish.
    pub fn join(mut self) -> Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name)),
            None => Ok(()),
        }
    }

    /// Whether the station loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sums frames of samples into one energy value per frame.
    struct EnergyStation {
        shutdown_called: Arc<AtomicBool>,
    }

    impl Station for EnergyStation {
        type Input = Vec<i16>;
        type Output = i64;

        fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError> {
            if input.is_empty() {
                return Ok(None);
            }
            Ok(Some(input.iter().map(|&s| (s as i64).abs()).sum()))
        }

        fn name(&self) -> &'static str {
            "energy"
        }

        fn shutdown(&mut self) {
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    /// Rejects negative sequence numbers; `i64::MIN` is fatal.
    struct SequenceStation;

    impl Station for SequenceStation {
        type Input = i64;
        type Output = i64;

        fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError> {
            match input {
                i64::MIN => Err(StationError::Fatal("sentinel".to_string())),
                n if n < 0 => Err(StationError::Recoverable(format!("bad sequence {}", n))),
                n => Ok(Some(n)),
            }
        }

        fn name(&self) -> &'static str {
            "sequence"
        }
    }

    #[derive(Default)]
    struct MockReporter {
        errors: Arc<Mutex<Vec<(String, StationError)>>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, station: &str, error: &StationError) {
            self.errors
                .lock()
                .unwrap()
                .push((station.to_string(), error.clone()));
        }
    }

    fn energy_station() -> (EnergyStation, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            EnergyStation {
                shutdown_called: flag.clone(),
            },
            flag,
        )
    }

    #[test]
    fn test_processes_in_order_and_filters() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let (station, shutdown) = energy_station();
        let runner = StationRunner::spawn(
            station,
            input_rx,
            output_tx,
            Arc::new(MockReporter::default()),
        );
        assert_eq!(runner.name(), "energy");

        input_tx.send(vec![1, -2, 3]).unwrap();
        input_tx.send(vec![]).unwrap();
        input_tx.send(vec![-10]).unwrap();
        drop(input_tx);

        let outputs: Vec<i64> = output_rx.iter().collect();
        assert_eq!(outputs, vec![6, 10]);

        runner.join().unwrap();
        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recoverable_errors_are_reported_and_skipped() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let runner = StationRunner::spawn(SequenceStation, input_rx, output_tx, reporter);

        for n in [1, -1, 2, -2, 3] {
            input_tx.send(n).unwrap();
        }
        drop(input_tx);

        let outputs: Vec<i64> = output_rx.iter().collect();
        assert_eq!(outputs, vec![1, 2, 3]);

        let reported = errors.lock().unwrap();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].0, "sequence");
        assert_eq!(
            reported[0].1,
            StationError::Recoverable("bad sequence -1".to_string())
        );
        drop(reported);

        runner.join().unwrap();
    }

    #[test]
    fn test_fatal_error_stops_station() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let runner = StationRunner::spawn(SequenceStation, input_rx, output_tx, reporter);

        input_tx.send(1).unwrap();
        input_tx.send(i64::MIN).unwrap();
        let _ = input_tx.send(2);

        runner.join().unwrap();
        assert_eq!(output_rx.try_iter().collect::<Vec<_>>(), vec![1]);
        assert!(matches!(errors.lock().unwrap()[0].1, StationError::Fatal(_)));
    }

    #[test]
    fn test_closed_output_stops_station() {
        let (input_tx, input_rx) = bounded(10);
        let (output_tx, output_rx) = bounded(10);
        let (station, shutdown) = energy_station();
        let runner = StationRunner::spawn(
            station,
            input_rx,
            output_tx,
            Arc::new(MockReporter::default()),
        );

        drop(output_rx);
        input_tx.send(vec![1]).unwrap();

        runner.join().unwrap();
        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn test_closed_input_stops_station() {
        let (input_tx, input_rx) = bounded::<Vec<i16>>(10);
        let (output_tx, _output_rx) = bounded(10);
        let (station, shutdown) = energy_station();
        let runner = StationRunner::spawn(
            station,
            input_rx,
            output_tx,
            Arc::new(MockReporter::default()),
        );

        drop(input_tx);
        runner.join().unwrap();
        assert!(shutdown.load(Ordering::SeqCst));
    }
}
