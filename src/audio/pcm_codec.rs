//! Stateless PCM sample conversion.
//!
//! - Device side: normalized f32 samples in [-1.0, 1.0]
//! - Wire side: little-endian i16, mono, no header

use crate::error::RelayError;
use bytes::{Buf, BufMut, BytesMut};

/// Convert normalized float samples to 16-bit fixed point.
///
/// Input is clamped to [-1.0, 1.0], never rejected. The mapping is asymmetric
/// (×32768 for negative, ×32767 for positive) so both int16 rails are reachable
/// exactly.
pub fn encode(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0).round() as i16
            } else {
                (s * 32767.0).round() as i16
            }
        })
        .collect()
}

/// Inverse of [`encode`]: 16-bit fixed point back to normalized float.
pub fn decode(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&v| {
            if v < 0 {
                v as f32 / 32768.0
            } else {
                v as f32 / 32767.0
            }
        })
        .collect()
}

/// Parse a wire frame (raw little-endian i16 bytes) into samples.
///
/// Frame length implicitly encodes the sample count; an odd byte length cannot
/// be a valid frame.
pub fn frame_to_samples(frame: &[u8]) -> Result<Vec<i16>, RelayError> {
    if frame.len() % 2 != 0 {
        return Err(RelayError::Decode(format!(
            "frame length {} is not a multiple of the sample width",
            frame.len()
        )));
    }
    let mut buf = frame;
    let mut samples = Vec::with_capacity(frame.len() / 2);
    while buf.remaining() >= 2 {
        samples.push(buf.get_i16_le());
    }
    Ok(samples)
}

/// Serialize samples into a wire frame.
pub fn samples_to_frame(samples: &[i16]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.to_vec()
}
