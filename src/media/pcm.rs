//! PCM16 sample helpers

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Full-scale divisor mapping `i16` onto `[-1.0, 1.0)`
const FULL_SCALE: f32 = 32768.0;

/// Interpret a payload as little-endian signed 16-bit samples
///
/// A payload with an odd number of bytes is rejected.
pub fn decode_samples(payload: &[u8]) -> Result<Vec<i16>, ProtocolError> {
    if payload.len() % 2 != 0 {
        return Err(ProtocolError::InvalidPcm(payload.len()));
    }

    Ok(payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize samples as a little-endian PCM16 payload
pub fn encode_samples(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Rescale one sample to the normalized float range used by output devices
#[inline]
pub fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / FULL_SCALE
}
