//! Sending authorized frames to the remote session.
//!
//! The coordinator hands frames to an [`Uplink`] and never waits on the
//! network. [`QueuedUplink`] pushes them onto a bounded channel drained by an
//! [`UplinkStation`] thread; a full queue drops the frame rather than stalling
//! the turn machine.

use crate::audio::codec::encode_frame;
use crate::error::{ParleyError, Result};
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::station::{Station, StationRunner};
use crate::session::RemoteSession;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;

/// A frame approved for transmission, with the input gain to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkFrame {
    pub sequence: u64,
    pub samples: Vec<i16>,
    pub gain: f32,
}

pub trait Uplink: Send {
    /// Hands one frame off for sending. Must not block.
    ///
    /// # Errors
    /// `Transmission` if the frame was dropped.
    fn send(&mut self, frame: UplinkFrame) -> Result<()>;

    /// Stops accepting frames. Idempotent.
    fn close(&mut self) {}
}

/// Encodes and sends on the caller's thread.
///
/// Suitable where `send` on the session is itself non-blocking, and for
/// offline replay.
pub struct DirectUplink {
    session: Arc<dyn RemoteSession>,
    sample_rate: u32,
}

impl DirectUplink {
    pub fn new(session: Arc<dyn RemoteSession>, sample_rate: u32) -> Self {
        Self {
            session,
            sample_rate,
        }
    }
}

impl Uplink for DirectUplink {
    fn send(&mut self, frame: UplinkFrame) -> Result<()> {
        let encoded = encode_frame(frame.sequence, &frame.samples, frame.gain, self.sample_rate);
        self.session.send(&encoded)
    }
}

/// Hands frames to an [`UplinkStation`] thread.
pub struct QueuedUplink {
    tx: Option<Sender<UplinkFrame>>,
}

impl Uplink for QueuedUplink {
    fn send(&mut self, frame: UplinkFrame) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(ParleyError::Transmission {
                message: "uplink is closed".to_string(),
            });
        };
        let sequence = frame.sequence;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ParleyError::Transmission {
                message: format!("uplink queue full, dropped frame {}", sequence),
            },
            TrySendError::Disconnected(_) => ParleyError::Transmission {
                message: "uplink station stopped".to_string(),
            },
        })
    }

    fn close(&mut self) {
        // Dropping the sender lets the station drain and exit.
        self.tx = None;
    }
}

/// Terminal station: encodes frames and sends them in capture order.
pub struct UplinkStation {
    session: Arc<dyn RemoteSession>,
    sample_rate: u32,
    sent: u64,
    dropped: u64,
}

impl UplinkStation {
    pub fn new(session: Arc<dyn RemoteSession>, sample_rate: u32) -> Self {
        Self {
            session,
            sample_rate,
            sent: 0,
            dropped: 0,
        }
    }
}

impl Station for UplinkStation {
    type Input = UplinkFrame;
    type Output = ();

    fn process(&mut self, frame: UplinkFrame) -> std::result::Result<Option<()>, StationError> {
        // No sends, and no retries, once the session is closed.
        if self.session.is_closed() {
            self.dropped += 1;
            return Ok(None);
        }

        let encoded = encode_frame(frame.sequence, &frame.samples, frame.gain, self.sample_rate);
        match self.session.send(&encoded) {
            Ok(()) => {
                self.sent += 1;
                Ok(None)
            }
            Err(e) => {
                self.dropped += 1;
                Err(e.into())
            }
        }
    }

    fn name(&self) -> &'static str {
        "uplink"
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            target: "parley::uplink",
            sent = self.sent,
            dropped = self.dropped,
            "uplink finished"
        );
    }
}

/// Spawns an [`UplinkStation`] and returns the uplink feeding it.
pub fn spawn_uplink(
    session: Arc<dyn RemoteSession>,
    sample_rate: u32,
    buffer: usize,
    reporter: Arc<dyn ErrorReporter>,
) -> (QueuedUplink, StationRunner<UplinkStation>) {
    let (tx, rx) = crossbeam_channel::bounded(buffer);
    // Nothing is forwarded past the uplink.
    let (sink, _) = crossbeam_channel::bounded(0);
    let runner = StationRunner::spawn(UplinkStation::new(session, sample_rate), rx, sink, reporter);
    (QueuedUplink { tx: Some(tx) }, runner)
}
