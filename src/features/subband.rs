//! Subband analysis
//!
//! Splits the signal into the lowest 8 bands of the MPEG-Audio 32 band
//! polyphase filterbank (nominally 0 to 5512.5 Hz at 11025 Hz) and reports
//! the energy of the complex band-pass signal in each band.
//!
//! Algorithm:
//! 1. Window 128 samples with the prototype filter `C`
//! 2. Fold the windowed block into 8 values (sum of 16 repetitions)
//! 3. Project onto the cosine/sine modulation matrices per band
//! 4. Energy = real² + imag²
//! 5. Hop by 8 samples and repeat
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::features::subband::SubbandAnalyzer;
//!
//! let analyzer = SubbandAnalyzer::new();
//! let samples = vec![100i16; 1024];
//! let energies = analyzer.analyze(&samples)?;
//! assert_eq!(energies.num_frames(), (1024 - 127) / 8);
//! # Ok::<(), stratum_fingerprint::AnalysisError>(())
//! ```

use std::f64::consts::PI;

use crate::error::AnalysisError;

/// Number of bands produced
pub const NUM_BANDS: usize = 8;

/// Prototype filter length
pub const FILTER_LEN: usize = 128;

/// Samples between consecutive frames
pub const HOP: usize = NUM_BANDS;

/// Shortest input `analyze` accepts
pub const MIN_SAMPLES: usize = FILTER_LEN + HOP - 1;

/// Prototype filter of the MPEG-Audio polyphase filterbank (ISO 11172-3, table C.1)
#[rustfmt::skip]
const C: [f32; FILTER_LEN] = [
    0.000000477, 0.000000954, 0.000001431, 0.000002384, 0.000003815, 0.000006199, 0.000009060, 0.000013828,
    0.000019550, 0.000027657, 0.000037670, 0.000049591, 0.000062943, 0.000076771, 0.000090599, 0.000101566,
    -0.000108242, -0.000106812, -0.000095367, -0.000069618, -0.000027180, 0.000034332, 0.000116348, 0.000218868,
    0.000339031, 0.000472546, 0.000611782, 0.000747204, 0.000866413, 0.000954151, 0.000994205, 0.000971317,
    -0.000868797, -0.000674248, -0.000378609, 0.000021458, 0.000522137, 0.001111031, 0.001766682, 0.002457142,
    0.003141880, 0.003771782, 0.004290581, 0.004638195, 0.004752159, 0.004573822, 0.004049301, 0.003134727,
    -0.001800537, -0.000033379, 0.002161503, 0.004756451, 0.007703304, 0.010933399, 0.014358521, 0.017876148,
    0.021372318, 0.024725437, 0.027815342, 0.030526638, 0.032754898, 0.034412861, 0.035435200, 0.035780907,
    -0.035435200, -0.034412861, -0.032754898, -0.030526638, -0.027815342, -0.024725437, -0.021372318, -0.017876148,
    -0.014358521, -0.010933399, -0.007703304, -0.004756451, -0.002161503, 0.000033379, 0.001800537, 0.003134727,
    -0.004049301, -0.004573822, -0.004752159, -0.004638195, -0.004290581, -0.003771782, -0.003141880, -0.002457142,
    -0.001766682, -0.001111031, -0.000522137, -0.000021458, 0.000378609, 0.000674248, 0.000868797, 0.000971317,
    -0.000994205, -0.000954151, -0.000866413, -0.000747204, -0.000611782, -0.000472546, -0.000339031, -0.000218868,
    -0.000116348, -0.000034332, 0.000027180, 0.000069618, 0.000095367, 0.000106812, 0.000108242, 0.000101566,
    -0.000090599, -0.000076771, -0.000062943, -0.000049591, -0.000037670, -0.000027657, -0.000019550, -0.000013828,
    -0.000009060, -0.000006199, -0.000003815, -0.000002384, -0.000001431, -0.000000954, -0.000000477, 0.0,
];

/// Band energies, frame-major
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandEnergies {
    data: Vec<f32>,
    num_frames: usize,
}

impl BandEnergies {
    /// Build from per-frame energy rows
    pub fn from_frames(frames: Vec<[f32; NUM_BANDS]>) -> Self {
        let num_frames = frames.len();
        let data = frames.into_iter().flatten().collect();
        Self { data, num_frames }
    }

    /// Number of frames
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// True if no frame was produced
    pub fn is_empty(&self) -> bool {
        self.num_frames == 0
    }

    /// Energy of `band` at `frame`
    pub fn get(&self, band: usize, frame: usize) -> Option<f32> {
        if band >= NUM_BANDS || frame >= self.num_frames {
            return None;
        }
        Some(self.data[frame * NUM_BANDS + band])
    }

    /// All band energies of one frame
    pub fn frame(&self, frame: usize) -> Option<&[f32]> {
        let start = frame.checked_mul(NUM_BANDS)?;
        self.data.get(start..start + NUM_BANDS)
    }

    /// Energy sequence of one band
    pub fn band(&self, band: usize) -> Vec<f32> {
        if band >= NUM_BANDS {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(band)
            .step_by(NUM_BANDS)
            .copied()
            .collect()
    }

    /// Iterate over frames
    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(NUM_BANDS)
    }
}

/// 8-band analysis filterbank
///
/// The modulation matrices are computed once in [`SubbandAnalyzer::new`] and
/// never change; [`analyze`](SubbandAnalyzer::analyze) borrows immutably.
/// [`process`](SubbandAnalyzer::process) additionally keeps the samples not
/// yet covered by a full frame so that a stream cut into blocks yields the
/// same frames as the whole stream.
#[derive(Debug, Clone)]
pub struct SubbandAnalyzer {
    mr: [[f32; NUM_BANDS]; NUM_BANDS],
    mi: [[f32; NUM_BANDS]; NUM_BANDS],
    carry: Vec<i16>,
    frames_emitted: u64,
}

impl Default for SubbandAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubbandAnalyzer {
    /// Build the modulation matrices
    pub fn new() -> Self {
        let mut mr = [[0.0f32; NUM_BANDS]; NUM_BANDS];
        let mut mi = [[0.0f32; NUM_BANDS]; NUM_BANDS];
        for i in 0..NUM_BANDS {
            for k in 0..NUM_BANDS {
                let phase = ((2 * i + 1) as f64) * (k as f64 - 4.0) * PI / 16.0;
                mr[i][k] = phase.cos() as f32;
                mi[i][k] = phase.sin() as f32;
            }
        }
        Self {
            mr,
            mi,
            carry: Vec::new(),
            frames_emitted: 0,
        }
    }

    /// Nominal centre frequency of `band` for a given sample rate
    pub fn band_center_hz(band: usize, sample_rate: u32) -> f32 {
        (2 * band + 1) as f32 * sample_rate as f32 / 32.0
    }

    /// Analyse an independent block
    ///
    /// Produces `(N - 127) / 8` frames for `N` samples.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InsufficientSamples` if that count is zero.
    pub fn analyze(&self, samples: &[i16]) -> Result<BandEnergies, AnalysisError> {
        let num_frames = (samples.len() + 1).saturating_sub(FILTER_LEN) / HOP;
        if num_frames == 0 {
            return Err(AnalysisError::InsufficientSamples {
                needed: MIN_SAMPLES,
                got: samples.len(),
            });
        }

        let frames = (0..num_frames)
            .map(|t| self.frame_energy(&samples[t * HOP..t * HOP + FILTER_LEN]))
            .collect();
        Ok(BandEnergies::from_frames(frames))
    }

    /// Analyse the next block of a stream
    ///
    /// Returns every frame whose 128-sample window is complete; the rest of
    /// the input is held for the next call. May return no frames.
    pub fn process(&mut self, samples: &[i16]) -> BandEnergies {
        self.carry.extend_from_slice(samples);
        if self.carry.len() < FILTER_LEN {
            return BandEnergies::default();
        }

        let num_frames = (self.carry.len() - FILTER_LEN) / HOP + 1;
        let frames: Vec<[f32; NUM_BANDS]> = (0..num_frames)
            .map(|t| self.frame_energy(&self.carry[t * HOP..t * HOP + FILTER_LEN]))
            .collect();
        self.carry.drain(..num_frames * HOP);
        self.frames_emitted += num_frames as u64;

        log::debug!(
            "Subband analysis: {} frames, {} samples carried",
            num_frames,
            self.carry.len()
        );

        BandEnergies::from_frames(frames)
    }

    /// Frames produced by [`process`](SubbandAnalyzer::process) so far
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Drop carried samples and the frame count
    pub fn reset(&mut self) {
        self.carry.clear();
        self.frames_emitted = 0;
    }

    fn frame_energy(&self, window: &[i16]) -> [f32; NUM_BANDS] {
        let mut y = [0.0f32; NUM_BANDS];
        for (i, (&x, &c)) in window.iter().zip(C.iter()).enumerate() {
            y[i % NUM_BANDS] += x as f32 * c;
        }

        let mut energies = [0.0f32; NUM_BANDS];
        for (band, energy) in energies.iter_mut().enumerate() {
            let mut dr = 0.0f32;
            let mut di = 0.0f32;
            for k in 0..NUM_BANDS {
                dr += self.mr[band][k] * y[k];
                di -= self.mi[band][k] * y[k];
            }
            *energy = dr * dr + di * di;
        }
        energies
    }
}
