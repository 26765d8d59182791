//! Wire encoding for audio crossing the session boundary.
//!
//! Uplink frames are signed 16-bit little-endian PCM, base64 encoded and
//! tagged with a MIME type carrying the rate. Downlink chunks use the same
//! packing at the output rate and are decoded to f32 in [-1, 1].

use crate::error::{ParleyError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// MIME type for raw PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// One uplink frame ready for the remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Sequence number of the captured frame this was built from.
    pub sequence: u64,
    pub mime_type: String,
    /// Base64 PCM16LE payload.
    pub data: String,
}

/// Apply `gain` to a frame and pack it for transmission.
pub fn encode_frame(sequence: u64, samples: &[i16], gain: f32, sample_rate: u32) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = sample as f32 / 32768.0 * gain;
        bytes.extend_from_slice(&f32_to_pcm16(scaled).to_le_bytes());
    }

    EncodedFrame {
        sequence,
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(bytes),
    }
}

/// Float sample in [-1, 1] to signed 16-bit, saturating.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Decode a base64 payload into raw bytes.
///
/// # Errors
/// `Decode` for invalid base64.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ParleyError::Decode {
            message: format!("invalid base64 audio payload: {e}"),
        })
}

/// Little-endian signed 16-bit PCM to f32 samples.
///
/// # Errors
/// `Decode` for an odd byte count.
pub fn decode_pcm16le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(ParleyError::Decode {
            message: format!("pcm16 payload has odd byte count {}", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Decode a base64 PCM16LE chunk into f32 samples.
pub fn decode_chunk(payload: &str) -> Result<Vec<f32>> {
    decode_pcm16le(&decode_base64(payload)?)
}

/// Pack f32 samples as base64 PCM16LE (the downlink format).
pub fn encode_chunk(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&s| f32_to_pcm16(s).to_le_bytes())
        .collect();
    STANDARD.encode(bytes)
}
