//! Band envelope smoothing
//!
//! Successive stretches of 8 subband energy frames are summed under a Hann
//! window, hopping by 4 frames (50% overlap), and the square root is taken.
//! One envelope frame covers 32 input samples.

use crate::features::subband::{BandEnergies, NUM_BANDS};

/// Energy frames per envelope window
pub const WINDOW_LEN: usize = 8;

/// Energy frames between envelope frames
pub const WINDOW_HOP: usize = 4;

/// Input samples per envelope (onset) frame
pub const SAMPLES_PER_FRAME: usize = WINDOW_HOP * crate::features::subband::HOP;

/// Streaming Hann-window envelope over band energies
#[derive(Debug, Clone)]
pub struct Envelope {
    window: [f64; WINDOW_LEN],
    carry: Vec<[f64; NUM_BANDS]>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    /// Create an envelope follower with an empty history
    pub fn new() -> Self {
        let mut window = [0.0; WINDOW_LEN];
        for (k, w) in window.iter_mut().enumerate() {
            *w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * k as f64 / (WINDOW_LEN - 1) as f64).cos();
        }
        Self {
            window,
            carry: Vec::new(),
        }
    }

    /// Feed energy frames and return every envelope frame now complete
    pub fn push(&mut self, energies: &BandEnergies) -> Vec<[f64; NUM_BANDS]> {
        self.carry.extend(energies.frames().map(|frame| {
            let mut row = [0.0; NUM_BANDS];
            for (dst, &src) in row.iter_mut().zip(frame) {
                *dst = src as f64;
            }
            row
        }));

        if self.carry.len() < WINDOW_LEN {
            return Vec::new();
        }

        let count = (self.carry.len() - WINDOW_LEN) / WINDOW_HOP + 1;
        let out = (0..count)
            .map(|m| {
                let stretch = &self.carry[m * WINDOW_HOP..m * WINDOW_HOP + WINDOW_LEN];
                let mut env = [0.0; NUM_BANDS];
                for (band, value) in env.iter_mut().enumerate() {
                    let sum: f64 = stretch
                        .iter()
                        .zip(self.window.iter())
                        .map(|(row, w)| w * row[band])
                        .sum();
                    *value = sum.sqrt();
                }
                env
            })
            .collect();

        self.carry.drain(..count * WINDOW_HOP);
        out
    }

    /// Energy frames waiting for a complete window
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Drop pending frames
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}
