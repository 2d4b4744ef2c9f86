//! Configuration parameters for fingerprinting

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::features::hashing::HashConfig;
use crate::features::onset::OnsetConfig;
use crate::io::sink::DEFAULT_BUFFER_SIZE;
use crate::preprocessing::whitening::WhiteningConfig;

/// Fingerprinting configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    // Stream
    /// Sample rate of the PCM input in Hz (default: 11025)
    pub sample_rate: u32,

    /// Transform sink buffer capacity in bytes (default: 10000, must be even)
    pub buffer_size: usize,

    // Stages
    /// Whitening filter parameters
    pub whitening: WhiteningConfig,

    /// Onset detector parameters
    pub onset: OnsetConfig,

    /// Code hashing parameters
    pub hash: HashConfig,

    // Output
    /// Capacity of the code channel (default: Some(0))
    /// `Some(0)` hands every code over directly, so a slow consumer stalls
    /// the analysis task; `None` buffers without limit
    pub code_channel_capacity: Option<usize>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11025,
            buffer_size: DEFAULT_BUFFER_SIZE,
            whitening: WhiteningConfig::default(),
            onset: OnsetConfig::default(),
            hash: HashConfig::default(),
            code_channel_capacity: Some(0),
        }
    }
}

impl FingerprintConfig {
    /// Defaults for another sample rate
    ///
    /// The whitening window tracks one second of audio; onset timing and code
    /// quantization are rate-aware on their own.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            whitening: WhiteningConfig {
                window: sample_rate as usize,
                ..WhiteningConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check every parameter
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` naming the first bad value.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.sample_rate == 0 {
            return Err(AnalysisError::InvalidInput(
                "Sample rate must be > 0".to_string(),
            ));
        }
        if self.buffer_size == 0 || self.buffer_size % 2 != 0 {
            return Err(AnalysisError::InvalidInput(format!(
                "Buffer size must be a positive even number of bytes, got {}",
                self.buffer_size
            )));
        }
        self.whitening.validate()?;
        self.onset.validate()?;
        self.hash.validate()?;
        Ok(())
    }
}
