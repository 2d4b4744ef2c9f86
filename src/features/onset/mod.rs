//! Onset detection
//!
//! Per band onsets from subband energies:
//! - Hann-window envelope smoothing (hop 4 energy frames, 32 samples)
//! - Adaptive exponentially decaying threshold
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::features::onset::{detect, OnsetConfig};
//! use stratum_fingerprint::features::subband::SubbandAnalyzer;
//!
//! let samples = vec![0i16; 11025];
//! let energies = SubbandAnalyzer::new().analyze(&samples)?;
//! let onsets = detect(&energies, &OnsetConfig::default())?;
//! assert_eq!(onsets.total(), 0);
//! # Ok::<(), stratum_fingerprint::AnalysisError>(())
//! ```

pub mod detector;
pub mod envelope;

pub use detector::OnsetDetector;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::features::subband::{BandEnergies, NUM_BANDS};

/// Onset detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Target spacing between onsets in envelope frames (default: 345, about 1 s)
    ///
    /// Also the upper bound of the threshold decay time constant.
    pub target_rate: u32,

    /// Threshold raise relative to the current peak (default: 1.05)
    pub overshoot: f64,

    /// Minimum spacing of onsets within a band, in envelope frames (default: 128)
    pub deadtime: u32,

    /// Floor the threshold never decays below (default: 1.0)
    pub min_threshold: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            target_rate: 345,
            overshoot: 1.05,
            deadtime: 128,
            min_threshold: 1.0,
        }
    }
}

impl OnsetConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.target_rate == 0 {
            return Err(AnalysisError::InvalidInput(
                "Target onset rate must be > 0".to_string(),
            ));
        }
        if !(self.overshoot >= 1.0) || !self.overshoot.is_finite() {
            return Err(AnalysisError::InvalidInput(format!(
                "Threshold overshoot must be >= 1.0, got {}",
                self.overshoot
            )));
        }
        if !(self.min_threshold > 0.0) || !self.min_threshold.is_finite() {
            return Err(AnalysisError::InvalidInput(format!(
                "Threshold floor must be positive, got {}",
                self.min_threshold
            )));
        }
        Ok(())
    }
}

/// A detected onset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Onset {
    /// Band index (0-7)
    pub band: usize,

    /// Envelope frame index from the start of the stream
    pub frame: u32,
}

/// Ordered onset frames per band
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnsetList {
    bands: [Vec<u32>; NUM_BANDS],
}

impl OnsetList {
    /// Group onsets by band, keeping their order
    pub fn from_onsets(onsets: &[Onset]) -> Self {
        let mut list = Self::default();
        for onset in onsets {
            if onset.band < NUM_BANDS {
                list.bands[onset.band].push(onset.frame);
            }
        }
        list
    }

    /// Onset frames of one band
    pub fn band(&self, band: usize) -> &[u32] {
        self.bands.get(band).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of onsets in one band
    pub fn count(&self, band: usize) -> usize {
        self.band(band).len()
    }

    /// Number of onsets over all bands
    pub fn total(&self) -> usize {
        self.bands.iter().map(Vec::len).sum()
    }
}

/// Detect onsets in a complete energy matrix
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` if the configuration is invalid,
/// and `AnalysisError::ProcessingError` if the input outruns the frame counter.
pub fn detect(energies: &BandEnergies, config: &OnsetConfig) -> Result<OnsetList, AnalysisError> {
    let mut detector = OnsetDetector::new(config.clone())?;
    let onsets = detector.process(energies)?;
    log::debug!(
        "Detected {} onsets over {} envelope frames",
        onsets.len(),
        detector.frames_processed()
    );
    Ok(OnsetList::from_onsets(&onsets))
}
