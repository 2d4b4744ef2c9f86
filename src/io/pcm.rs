//! Signed 16-bit little-endian PCM conversion
//!
//! The wire format carries no framing: a block is any even number of bytes,
//! two bytes per mono sample.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::AnalysisError;

/// Bytes per sample on the wire
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode a block of little-endian bytes into samples
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` if the block length is odd.
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<i16>, AnalysisError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(AnalysisError::InvalidInput(format!(
            "PCM block must hold whole samples, got {} bytes",
            bytes.len()
        )));
    }

    let mut samples = vec![0i16; bytes.len() / BYTES_PER_SAMPLE];
    LittleEndian::read_i16_into(bytes, &mut samples);
    Ok(samples)
}

/// Encode samples into little-endian bytes
pub fn encode_samples(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

/// Round a filtered value to the nearest sample, saturating at the i16 range
#[inline]
pub fn saturate(value: f64) -> i16 {
    let rounded = value.round();
    if rounded >= i16::MAX as f64 {
        i16::MAX
    } else if rounded <= i16::MIN as f64 {
        i16::MIN
    } else {
        rounded as i16
    }
}
