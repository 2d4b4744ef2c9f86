//! Onset-pair hash codes
//!
//! Every onset is paired with up to four following onsets of the same band.
//! Each pair yields two inter-onset intervals, quantized to 256-sample
//! (≈23.2 ms) steps, which are hashed together with the band index into a
//! 20-bit code. The onset's own time, quantized the same way, is attached.
//!
//! Pair table for onsets `o0..o4` (first interval, second interval):
//!
//! | # | dt0     | dt1     |
//! |---|---------|---------|
//! | 0 | o1 − o0 | o2 − o1 |
//! | 1 | o1 − o0 | o3 − o1 |
//! | 2 | o2 − o0 | o3 − o2 |
//! | 3 | o1 − o0 | o4 − o1 |
//! | 4 | o2 − o0 | o4 − o2 |
//! | 5 | o3 − o0 | o4 − o3 |
//!
//! Near the end of a band's onset list fewer neighbours exist: the
//! fourth-from-last onset emits pairs 0-2, the third-from-last pair 0 only,
//! and the last two emit nothing.
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::features::hashing::{codes_for_band, HashConfig};
//!
//! let codes = codes_for_band(2, &[0, 8, 24, 48, 80], 11025, &HashConfig::default());
//! assert_eq!(codes.len(), 6 + 3 + 1);
//! ```

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::analysis::code::Code;
use crate::error::AnalysisError;
use crate::features::onset::envelope::SAMPLES_PER_FRAME;
use crate::features::subband::NUM_BANDS;

/// Sample rate the quantization grid is defined at
const GRID_RATE: u64 = 11025;

/// Samples per quantization step at [`GRID_RATE`]
const GRID_STEP: u64 = 256;

/// Onsets needed for a full set of pairs
const PAIR_SPAN: usize = 5;

/// `(a, b, c, d)`: dt0 = o[a] − o[b], dt1 = o[c] − o[d]
const PAIRS: [(usize, usize, usize, usize); 6] = [
    (1, 0, 2, 1),
    (1, 0, 3, 1),
    (2, 0, 3, 2),
    (1, 0, 4, 1),
    (2, 0, 4, 2),
    (3, 0, 4, 3),
];

/// Hashing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashConfig {
    /// MurmurHash2 seed (default: 0x9ea5fa36)
    pub seed: u32,

    /// Mask applied to every hash (default: 0x000fffff)
    pub bitmask: u32,

    /// Offset added to every code time, in seconds (default: 0.0)
    pub time_offset_secs: f64,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            seed: 0x9ea5_fa36,
            bitmask: 0x000f_ffff,
            time_offset_secs: 0.0,
        }
    }
}

impl HashConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.time_offset_secs.is_finite() || self.time_offset_secs < 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "Time offset must be finite and >= 0, got {}",
                self.time_offset_secs
            )));
        }
        if self.bitmask == 0 {
            return Err(AnalysisError::InvalidInput(
                "Hash bitmask must keep at least one bit".to_string(),
            ));
        }
        Ok(())
    }
}

/// MurmurHash2, 32-bit
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = LittleEndian::read_u32(chunk);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Quantize an interval of onset frames to grid steps (truncating)
pub fn quantize_delta(frames: u32, sample_rate: u32) -> u32 {
    let samples = frames as u64 * SAMPLES_PER_FRAME as u64;
    (samples * GRID_RATE / (sample_rate as u64 * GRID_STEP)) as u32
}

/// Absolute time of an onset frame in milliseconds, rounded to the grid
pub fn quantize_time_ms(frame: u32, sample_rate: u32, offset_secs: f64) -> u32 {
    let steps = frame as f64 * SAMPLES_PER_FRAME as f64 * GRID_RATE as f64
        / (sample_rate as f64 * GRID_STEP as f64)
        + offset_secs * GRID_RATE as f64 / GRID_STEP as f64;
    let bucket = steps.round().max(0.0) as u64;
    // Saturates after about 49 days of stream time
    u32::try_from(bucket * GRID_STEP * 1000 / GRID_RATE).unwrap_or(u32::MAX)
}

/// Hash one pair of quantized intervals with the band index
pub fn hash_pair(dt0: u32, dt1: u32, band: usize, config: &HashConfig) -> u32 {
    let mut material = [0u8; 5];
    // 16 bits per interval, as in Echoprint: intervals of 65536 grid steps
    // (about 25 minutes at 11025 Hz) or more wrap around
    LittleEndian::write_u16(&mut material[0..2], dt0 as u16);
    LittleEndian::write_u16(&mut material[2..4], dt1 as u16);
    material[4] = band as u8;
    murmur_hash2(&material, config.seed) & config.bitmask
}

/// Codes anchored at `onsets[0]`, using the first `pairs` entries of the pair table
fn anchor_codes(
    band: usize,
    onsets: &[u32],
    pairs: usize,
    sample_rate: u32,
    config: &HashConfig,
    out: &mut Vec<Code>,
) {
    let time = quantize_time_ms(onsets[0], sample_rate, config.time_offset_secs);
    for &(a, b, c, d) in &PAIRS[..pairs] {
        let dt0 = quantize_delta(onsets[a] - onsets[b], sample_rate);
        let dt1 = quantize_delta(onsets[c] - onsets[d], sample_rate);
        out.push(Code::new(time, hash_pair(dt0, dt1, band, config)));
    }
}

/// Number of pairs the onset at `index` of a list of `count` onsets emits
fn pairs_for(index: usize, count: usize) -> usize {
    match count - index {
        0..=2 => 0,
        3 => 1,
        4 => 3,
        _ => PAIRS.len(),
    }
}

/// All codes for one band's complete, ordered onset list
pub fn codes_for_band(band: usize, onsets: &[u32], sample_rate: u32, config: &HashConfig) -> Vec<Code> {
    let mut codes = Vec::new();
    for index in 0..onsets.len().saturating_sub(2) {
        let pairs = pairs_for(index, onsets.len());
        anchor_codes(band, &onsets[index..], pairs, sample_rate, config, &mut codes);
    }
    codes
}

/// Streaming code emitter
///
/// Holds the last few onsets of each band. An onset produces its full set
/// of six codes as soon as four later onsets exist; the remaining tail
/// codes come out of [`finish`](CodeEmitter::finish). The codes are the same
/// as [`codes_for_band`] over the whole stream.
#[derive(Debug, Clone)]
pub struct CodeEmitter {
    config: HashConfig,
    sample_rate: u32,
    recent: Vec<VecDeque<u32>>,
}

impl CodeEmitter {
    /// Create an emitter
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` for a zero sample rate or an invalid configuration.
    pub fn new(config: HashConfig, sample_rate: u32) -> Result<Self, AnalysisError> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidInput(
                "Sample rate must be > 0".to_string(),
            ));
        }
        Ok(Self {
            config,
            sample_rate,
            recent: (0..NUM_BANDS)
                .map(|_| VecDeque::with_capacity(PAIR_SPAN))
                .collect(),
        })
    }

    /// Record an onset; returns any codes it completes
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` for a band out of range or an
    /// onset earlier than the previous one in its band.
    pub fn push(&mut self, band: usize, frame: u32) -> Result<Vec<Code>, AnalysisError> {
        let recent = self.recent.get_mut(band).ok_or_else(|| {
            AnalysisError::InvalidInput(format!("Band {} out of range", band))
        })?;
        if let Some(&last) = recent.back() {
            if frame < last {
                return Err(AnalysisError::InvalidInput(format!(
                    "Onset at frame {} precedes frame {} in band {}",
                    frame, last, band
                )));
            }
        }
        recent.push_back(frame);

        let mut codes = Vec::new();
        if recent.len() == PAIR_SPAN {
            let window: Vec<u32> = recent.iter().copied().collect();
            anchor_codes(band, &window, PAIRS.len(), self.sample_rate, &self.config, &mut codes);
            recent.pop_front();
        }
        Ok(codes)
    }

    /// Emit the tail codes of every band and clear the retained onsets
    pub fn finish(&mut self) -> Vec<Code> {
        let mut codes = Vec::new();
        for (band, recent) in self.recent.iter_mut().enumerate() {
            let tail: Vec<u32> = recent.drain(..).collect();
            for index in 0..tail.len().saturating_sub(2) {
                let pairs = pairs_for(index, tail.len());
                anchor_codes(band, &tail[index..], pairs, self.sample_rate, &self.config, &mut codes);
            }
        }
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur_hash2_vectors() {
        assert_eq!(murmur_hash2(b"", 0), 0);
        assert_eq!(murmur_hash2(b"hello", 0), 0xe561_29cb);
        assert_eq!(murmur_hash2(b"abcd", 1), 0xc93f_7a16);
    }

    #[test]
    fn test_quantize_delta() {
        // Eight 32-sample frames are one 256-sample step
        assert_eq!(quantize_delta(7, 11025), 0);
        assert_eq!(quantize_delta(8, 11025), 1);
        assert_eq!(quantize_delta(172, 11025), 21);
        // Twice the rate, twice the frames per step
        assert_eq!(quantize_delta(8, 22050), 0);
        assert_eq!(quantize_delta(16, 22050), 1);
    }

    #[test]
    fn test_long_intervals_wrap_to_16_bits() {
        let config = HashConfig::default();
        assert_eq!(
            hash_pair(65536 + 5, 2, 3, &config),
            hash_pair(5, 2, 3, &config)
        );
        assert_ne!(hash_pair(65535, 2, 3, &config), hash_pair(5, 2, 3, &config));
    }

    #[test]
    fn test_quantize_time_ms() {
        assert_eq!(quantize_time_ms(0, 11025, 0.0), 0);
        assert_eq!(quantize_time_ms(3, 11025, 0.0), 0);
        assert_eq!(quantize_time_ms(4, 11025, 0.0), 23);
        assert_eq!(quantize_time_ms(8, 11025, 0.0), 23);
        assert_eq!(quantize_time_ms(24, 11025, 0.0), 69);
        assert_eq!(quantize_time_ms(0, 11025, 1.0), 998);
        assert_eq!(quantize_time_ms(u32::MAX, 11025, 0.0), u32::MAX);
    }

    #[test]
    fn test_hash_pair_masked() {
        let config = HashConfig::default();
        let hash = hash_pair(1, 2, 3, &config);
        assert_eq!(hash, 0x000c_2048);
        assert!(hash <= config.bitmask);
        assert_ne!(hash, hash_pair(1, 2, 4, &config), "band must affect the hash");
        assert_ne!(hash, hash_pair(2, 1, 3, &config), "delta order must affect the hash");
    }

    #[test]
    fn test_codes_for_band_counts() {
        let config = HashConfig::default();
        assert!(codes_for_band(0, &[], 11025, &config).is_empty());
        assert!(codes_for_band(0, &[0, 10], 11025, &config).is_empty());
        assert_eq!(codes_for_band(0, &[0, 10, 20], 11025, &config).len(), 1);
        assert_eq!(codes_for_band(0, &[0, 10, 20, 30], 11025, &config).len(), 3 + 1);
        assert_eq!(codes_for_band(0, &[0, 10, 20, 30, 40], 11025, &config).len(), 6 + 3 + 1);
        assert_eq!(codes_for_band(0, &[0, 10, 20, 30, 40, 50], 11025, &config).len(), 6 + 6 + 3 + 1);
    }

    #[test]
    fn test_codes_for_band_values() {
        let codes = codes_for_band(2, &[0, 8, 24, 48, 80], 11025, &HashConfig::default());
        let expected = [
            (0, 545258),
            (0, 571953),
            (0, 12621),
            (0, 277027),
            (0, 847045),
            (0, 894671),
            (23, 1014742),
            (23, 105479),
            (23, 550870),
            (69, 63889),
        ];
        let actual: Vec<(u32, u32)> = codes.iter().map(|c| (c.time, c.hash)).collect();
        assert_eq!(actual, expected);

        // First pair: dt0 = 8 frames -> 1 step, dt1 = 16 frames -> 2 steps
        assert_eq!(codes[0].hash, hash_pair(1, 2, 2, &HashConfig::default()));
    }

    #[test]
    fn test_streaming_matches_batch() {
        let config = HashConfig::default();
        let onsets = [3u32, 150, 290, 470, 600, 745, 900, 1030, 1200];

        let mut emitter = CodeEmitter::new(config.clone(), 11025).unwrap();
        let mut streamed = Vec::new();
        for &frame in &onsets {
            streamed.extend(emitter.push(6, frame).unwrap());
        }
        let before_finish = streamed.len();
        streamed.extend(emitter.finish());

        assert_eq!(before_finish, 6 * (onsets.len() - 4));
        assert_eq!(streamed, codes_for_band(6, &onsets, 11025, &config));
        assert!(emitter.finish().is_empty(), "finish drains the retained onsets");
    }

    #[test]
    fn test_emitter_rejects_bad_onsets() {
        let mut emitter = CodeEmitter::new(HashConfig::default(), 11025).unwrap();
        assert!(emitter.push(8, 10).is_err());
        emitter.push(0, 100).unwrap();
        assert!(emitter.push(0, 99).is_err());
        assert!(CodeEmitter::new(HashConfig::default(), 0).is_err());
    }
}
