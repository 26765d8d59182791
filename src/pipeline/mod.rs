//! Threaded audio path between the microphone and the remote session.
//!
//! Capture → VAD → coordinator → uplink. Each stage runs on its own thread,
//! connected by bounded crossbeam channels; nothing on this path waits on the
//! network.

pub mod capture;
pub mod error;
pub mod station;
pub mod uplink;
pub mod vad_station;

pub use capture::{CaptureExit, CaptureLoop};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use station::{Station, StationRunner};
pub use uplink::{DirectUplink, QueuedUplink, Uplink, UplinkFrame, UplinkStation, spawn_uplink};
pub use vad_station::{ScoredFrame, VadStation};
