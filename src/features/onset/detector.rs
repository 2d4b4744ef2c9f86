//! Adaptive-threshold onset detection
//!
//! Each band's envelope is pre-emphasised (3-tap FIR over a 6-frame
//! difference followed by a one-pole IIR) and compared with a per-band
//! threshold `H`:
//!
//! - contact (`x > H`): `H = overshoot * x`; an onset is recorded on the
//!   frame contact begins, unless the previous onset of the band is less
//!   than `deadtime` frames ago
//! - otherwise `H` decays exponentially towards `t = max(x, min_threshold)`:
//!   `H ← t + (H − t)·exp(−1/τ)`
//!
//! The time constant τ grows by one frame while onsets arrive faster than
//! the target rate and shrinks by one frame otherwise, within `[1, target_rate]`.
//! Without new contact `H` therefore strictly decreases until it reaches the
//! floor.
//!
//! # Reference
//!
//! Ellis, D. P. W., Whitman, B., & Porter, A. (2011). Echoprint: An Open
//! Music Identification Service. *Proceedings of ISMIR*.

use super::envelope::Envelope;
use super::{Onset, OnsetConfig};
use crate::error::AnalysisError;
use crate::features::subband::{BandEnergies, NUM_BANDS};

/// Pre-emphasis FIR taps
const BN: [f64; 3] = [0.1883, 0.4230, 0.3392];

/// Pre-emphasis IIR pole
const A1: f64 = 0.98;

/// Envelope frames needed before the FIR difference is defined
const FIR_SPAN: usize = 2 * BN.len();

#[derive(Debug, Clone)]
struct BandState {
    /// Last FIR_SPAN + 1 envelope values, oldest first
    history: [f64; FIR_SPAN + 1],
    y0: f64,
    threshold: f64,
    tau: f64,
    since_onset: u32,
    last_onset: Option<u32>,
    contact: bool,
}

impl BandState {
    fn new(first: f64, config: &OnsetConfig) -> Self {
        Self {
            history: [0.0; FIR_SPAN + 1],
            y0: 0.0,
            threshold: first.max(config.min_threshold),
            tau: 1.0,
            since_onset: 0,
            last_onset: None,
            contact: false,
        }
    }

    fn emphasis(&mut self, value: f64, frame: u32) -> f64 {
        self.history.rotate_left(1);
        self.history[FIR_SPAN] = value;

        let mut xn = 0.0;
        if frame as usize >= FIR_SPAN {
            for (k, b) in BN.iter().enumerate() {
                xn += b * (self.history[FIR_SPAN - k] - self.history[k]);
            }
        }
        xn += A1 * self.y0;
        self.y0 = xn;
        xn
    }

    /// Returns true if an onset is recorded at `frame`
    fn step(&mut self, xn: f64, frame: u32, config: &OnsetConfig) -> bool {
        let mut onset = false;

        if xn > self.threshold {
            if !self.contact {
                let clear = match self.last_onset {
                    Some(last) => frame - last >= config.deadtime,
                    None => true,
                };
                if clear {
                    self.last_onset = Some(frame);
                    self.since_onset = 0;
                    onset = true;
                }
            }
            self.contact = true;
            self.threshold = config.overshoot * xn;
        } else {
            self.contact = false;
            let target = xn.max(config.min_threshold);
            self.threshold = target + (self.threshold - target) * (-1.0 / self.tau).exp();
        }

        self.since_onset = self.since_onset.saturating_add(1);
        let ttarg = config.target_rate as f64;
        if self.since_onset <= config.target_rate {
            self.tau = (self.tau + 1.0).min(ttarg);
        } else {
            self.tau = (self.tau - 1.0).max(1.0);
        }

        onset
    }
}

/// Streaming onset detector over all bands
///
/// Threshold state lives as long as the detector, so one instance follows
/// exactly one stream.
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    config: OnsetConfig,
    envelope: Envelope,
    bands: Option<Vec<BandState>>,
    frame: u32,
}

impl OnsetDetector {
    /// Create a detector
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` if the configuration is invalid.
    pub fn new(config: OnsetConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            config,
            envelope: Envelope::new(),
            bands: None,
            frame: 0,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &OnsetConfig {
        &self.config
    }

    /// Feed band energies; returns the onsets found, ordered by frame then band
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::ProcessingError` once the envelope frame
    /// counter runs out, after about 144 days of audio at 11025 Hz.
    pub fn process(&mut self, energies: &BandEnergies) -> Result<Vec<Onset>, AnalysisError> {
        let mut onsets = Vec::new();

        for env in self.envelope.push(energies) {
            let config = &self.config;
            let bands = self.bands.get_or_insert_with(|| {
                env.iter().map(|&first| BandState::new(first, config)).collect()
            });

            for (band, state) in bands.iter_mut().enumerate() {
                let xn = state.emphasis(env[band], self.frame);
                if state.step(xn, self.frame, config) {
                    onsets.push(Onset {
                        band,
                        frame: self.frame,
                    });
                }
            }
            self.frame = self.frame.checked_add(1).ok_or_else(|| {
                AnalysisError::ProcessingError(
                    "Onset frame counter exhausted, stream too long".to_string(),
                )
            })?;
        }

        if !onsets.is_empty() {
            log::debug!(
                "{} onsets up to frame {} ({} energy frames in)",
                onsets.len(),
                self.frame,
                energies.num_frames()
            );
        }
        Ok(onsets)
    }

    /// Current threshold of every band (`None` before the first envelope frame)
    pub fn thresholds(&self) -> Option<[f64; NUM_BANDS]> {
        let bands = self.bands.as_ref()?;
        let mut out = [0.0; NUM_BANDS];
        for (dst, state) in out.iter_mut().zip(bands) {
            *dst = state.threshold;
        }
        Some(out)
    }

    /// Envelope frames consumed so far
    pub fn frames_processed(&self) -> u32 {
        self.frame
    }

    /// Forget all state
    pub fn reset(&mut self) {
        self.envelope.reset();
        self.bands = None;
        self.frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 silent energy frames, then `pulses` bursts of 40 loud frames in `band`, every 688 frames
    fn pulse_train(band: usize, pulses: usize) -> BandEnergies {
        let mut frames = vec![[0.0f32; NUM_BANDS]; 100];
        for _ in 0..pulses {
            for f in 0..688 {
                let mut row = [0.0f32; NUM_BANDS];
                if f < 40 {
                    row[band] = 1e6;
                }
                frames.push(row);
            }
        }
        BandEnergies::from_frames(frames)
    }

    #[test]
    fn test_pulses_detected_in_their_band() {
        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        let onsets = detector.process(&pulse_train(3, 6)).unwrap();

        assert_eq!(onsets.len(), 6, "one onset per pulse: {:?}", onsets);
        assert!(onsets.iter().all(|o| o.band == 3));
        // Pulses are 172 envelope frames apart
        for pair in onsets.windows(2) {
            let gap = pair[1].frame - pair[0].frame;
            assert!((170..=175).contains(&gap), "gap {}", gap);
        }
        assert_eq!(detector.frames_processed(), (100 + 6 * 688 - 8) / 4 + 1);
    }

    #[test]
    fn test_split_input_matches_whole() {
        let energies = pulse_train(5, 4);
        let whole = OnsetDetector::new(OnsetConfig::default())
            .unwrap()
            .process(&energies)
            .unwrap();

        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        let frames: Vec<[f32; NUM_BANDS]> = energies
            .frames()
            .map(|f| {
                let mut row = [0.0; NUM_BANDS];
                row.copy_from_slice(f);
                row
            })
            .collect();
        let mut split = Vec::new();
        for chunk in frames.chunks(97) {
            split.extend(detector.process(&BandEnergies::from_frames(chunk.to_vec())).unwrap());
        }
        assert_eq!(split, whole);
    }

    #[test]
    fn test_threshold_decays_monotonically() {
        let config = OnsetConfig::default();
        let floor = config.min_threshold;
        let mut detector = OnsetDetector::new(config).unwrap();

        let mut frames = vec![[1e6f32; NUM_BANDS]; 8];
        frames.extend(vec![[0.0f32; NUM_BANDS]; 2000]);
        let energies = BandEnergies::from_frames(frames);

        let mut previous: Option<[f64; NUM_BANDS]> = None;
        for chunk in (0..energies.num_frames()).step_by(4) {
            let end = (chunk + 4).min(energies.num_frames());
            let rows = (chunk..end)
                .map(|t| {
                    let mut row = [0.0f32; NUM_BANDS];
                    row.copy_from_slice(energies.frame(t).unwrap());
                    row
                })
                .collect();
            let onsets = detector.process(&BandEnergies::from_frames(rows)).unwrap();
            assert!(onsets.is_empty());

            if let (Some(prev), Some(now)) = (previous, detector.thresholds()) {
                for band in 0..NUM_BANDS {
                    assert!(now[band] <= prev[band], "threshold rose in band {}", band);
                    assert!(
                        now[band] < prev[band] || (now[band] - floor).abs() < 1e-6,
                        "threshold stalled above the floor in band {}: {}",
                        band,
                        now[band]
                    );
                }
            }
            if detector.thresholds().is_some() {
                previous = detector.thresholds();
            }
        }
    }

    #[test]
    fn test_silence_and_constant_energy_give_no_onsets() {
        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        assert!(detector
            .process(&BandEnergies::from_frames(vec![[0.0; NUM_BANDS]; 3000]))
            .unwrap()
            .is_empty());

        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        assert!(detector
            .process(&BandEnergies::from_frames(vec![[5e5; NUM_BANDS]; 3000]))
            .unwrap()
            .is_empty());
        let thresholds = detector.thresholds().unwrap();
        assert!(thresholds.iter().all(|&h| h >= 1.0));
    }

    #[test]
    fn test_reset() {
        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        let first = detector.process(&pulse_train(2, 2)).unwrap();
        detector.reset();
        assert!(detector.thresholds().is_none());
        assert_eq!(detector.frames_processed(), 0);
        assert_eq!(detector.process(&pulse_train(2, 2)).unwrap(), first);
    }

    #[test]
    fn test_frame_counter_exhaustion_is_an_error() {
        let mut detector = OnsetDetector::new(OnsetConfig::default()).unwrap();
        detector.frame = u32::MAX - 1;

        // 16 energy frames give 3 envelope frames; the second one runs out
        let result = detector.process(&BandEnergies::from_frames(vec![[0.0; NUM_BANDS]; 16]));
        assert!(matches!(result, Err(AnalysisError::ProcessingError(_))));
        assert_eq!(detector.frames_processed(), u32::MAX);
    }
}
