//! Audio I/O and signal processing.
//!
//! Input side: a [`FrameSource`] delivers PCM batches which a
//! [`FrameAssembler`] slices into fixed frames for the [`FormantVad`].
//! Output side: an [`AudioOutput`] plays decoded chunks at scheduled times.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod codec;
pub mod frame;
pub mod output;
pub mod source;
#[cfg(feature = "cpal-audio")]
pub mod speaker;
pub mod vad;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CaptureHints, CpalFrameSource, DeviceInfo, DeviceKind, list_devices};
pub use codec::{
    EncodedFrame, decode_base64, decode_chunk, decode_pcm16le, encode_chunk, encode_frame,
};
pub use frame::{Frame, FrameAssembler};
pub use output::{AudioOutput, ChunkId, VirtualOutput};
pub use source::{FrameSource, MockFrameSource, MockSourceMonitor};
#[cfg(feature = "cpal-audio")]
pub use speaker::CpalOutput;
pub use vad::{FormantVad, VadConfig, VadDecision};
pub use wav::WavFrameSource;
