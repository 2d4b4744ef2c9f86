//! Adaptive LPC whitening
//!
//! From the Echoprint paper: a 40-pole LPC filter is estimated from the
//! autocorrelation of 1 second analysis windows, smoothed with an 8 window
//! decay constant, and its inverse (FIR) filter is applied to the signal.
//! Strong stationary resonances from the speaker, microphone or room are
//! cancelled by matching zeros before fingerprinting.
//!
//! # Block independence
//!
//! Autocorrelation is accumulated sample by sample and folded into the
//! smoothed estimate `R` only when an analysis window completes, so the
//! predictor changes at fixed stream positions. Samples in window k are
//! filtered with coefficients estimated from windows before k; the first
//! window passes through unchanged. Together with the carried input tail
//! `xo`, this makes the output identical however the stream is split into
//! blocks.
//!
//! # Reference
//!
//! Ellis, D. P. W., Whitman, B., & Porter, A. (2011). Echoprint: An Open
//! Music Identification Service. *Proceedings of ISMIR*.

use serde::{Deserialize, Serialize};

use super::lpc::durbin;
use crate::error::AnalysisError;
use crate::io::pcm::{decode_samples, encode_samples, saturate};
use crate::io::transform::Transform;

/// Seed (and lower bound) for the zero-lag autocorrelation `R[0]`
pub const AUTOCORRELATION_FLOOR: f64 = 0.001;

/// Whitening parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteningConfig {
    /// Number of LPC poles (default: 40)
    pub order: usize,

    /// Smoothing decay constant in analysis windows (default: 8.0, alpha = 1/8)
    pub decay_constant: f64,

    /// Analysis window length in samples (default: 11025, one second at 11025 Hz)
    pub window: usize,
}

impl Default for WhiteningConfig {
    fn default() -> Self {
        Self {
            order: 40,
            decay_constant: 8.0,
            window: 11025,
        }
    }
}

impl WhiteningConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.order == 0 {
            return Err(AnalysisError::InvalidInput(
                "LPC order must be > 0".to_string(),
            ));
        }
        if !(self.decay_constant >= 1.0) || !self.decay_constant.is_finite() {
            return Err(AnalysisError::InvalidInput(format!(
                "Decay constant must be a finite value >= 1.0, got {}",
                self.decay_constant
            )));
        }
        if self.window <= self.order {
            return Err(AnalysisError::InvalidInput(format!(
                "Analysis window ({}) must be longer than the LPC order ({})",
                self.window, self.order
            )));
        }
        Ok(())
    }
}

/// Persistent whitening state, owned by a single stream
#[derive(Debug, Clone)]
pub struct FilterState {
    /// Last order+1 input samples, oldest first
    xo: Vec<f64>,
    /// Smoothed autocorrelation
    r: Vec<f64>,
    /// Autocorrelation accumulated over the current analysis window
    acc: Vec<f64>,
    /// Samples seen in the current analysis window
    fill: usize,
    /// Completed analysis windows
    windows: u64,
}

impl FilterState {
    fn new(order: usize) -> Self {
        let mut r = vec![0.0; order + 1];
        r[0] = AUTOCORRELATION_FLOOR;
        Self {
            xo: vec![0.0; order + 1],
            r,
            acc: vec![0.0; order + 1],
            fill: 0,
            windows: 0,
        }
    }

    /// Input tail carried into the next block, oldest first
    pub fn xo(&self) -> &[f64] {
        &self.xo
    }

    /// Smoothed autocorrelation `R[0..=order]`
    pub fn autocorrelation(&self) -> &[f64] {
        &self.r
    }

    /// Number of analysis windows folded into `R`
    pub fn windows_completed(&self) -> u64 {
        self.windows
    }

    fn close_window(&mut self, alpha: f64) {
        for (r, acc) in self.r.iter_mut().zip(self.acc.iter_mut()) {
            *r += alpha * (*acc - *r);
            *acc = 0.0;
        }
        if !(self.r[0] >= AUTOCORRELATION_FLOOR) {
            self.r[0] = AUTOCORRELATION_FLOOR;
        }
        self.fill = 0;
        self.windows += 1;
    }
}

/// Whitening transform
///
/// Inherently sequential: each call continues from the state left by the
/// previous one, so one instance serves exactly one stream.
#[derive(Debug, Clone)]
pub struct Whitening {
    config: WhiteningConfig,
    alpha: f64,
    state: FilterState,
    /// Predictor solved from `state.r` when the last window closed
    ai: Vec<f64>,
}

/// Predictor coefficients for `r`, or zeros (passthrough) if `r` is unusable
fn solve(r: &[f64]) -> Vec<f64> {
    match durbin(r) {
        Ok(lpc) => lpc.coefficients,
        Err(err) => {
            log::warn!("Whitening falls back to passthrough: {}", err);
            vec![0.0; r.len()]
        }
    }
}

impl Whitening {
    /// Create a whitening filter
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` if the configuration is invalid.
    pub fn new(config: WhiteningConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let state = FilterState::new(config.order);
        Ok(Self {
            alpha: 1.0 / config.decay_constant,
            ai: solve(&state.r),
            state,
            config,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &WhiteningConfig {
        &self.config
    }

    /// Current filter state
    pub fn state(&self) -> &FilterState {
        &self.state
    }

    /// Forget all history, as if the stream restarted
    pub fn reset(&mut self) {
        self.state = FilterState::new(self.config.order);
        self.ai = solve(&self.state.r);
    }

    /// Current predictor coefficients `a[0..=order]`
    ///
    /// Solved from `R` once per analysis window, when the window closes.
    pub fn coefficients(&self) -> &[f64] {
        &self.ai
    }

    /// Whiten a block of samples
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        let order = self.config.order;
        let tail = order + 1;

        // history[tail + n] is sample n of this block; earlier entries come from xo
        let mut history = Vec::with_capacity(tail + samples.len());
        history.extend_from_slice(&self.state.xo);
        history.extend(samples.iter().map(|&s| s as f64));

        let mut out = Vec::with_capacity(samples.len());

        for n in tail..history.len() {
            let x = history[n];

            let mut acc = x;
            for j in 1..=order {
                acc -= self.ai[j] * history[n - j];
            }
            out.push(saturate(acc));

            for (lag, sum) in self.state.acc.iter_mut().enumerate() {
                *sum += x * history[n - lag];
            }

            self.state.fill += 1;
            if self.state.fill == self.config.window {
                self.state.close_window(self.alpha);
                self.ai = solve(&self.state.r);
                log::trace!(
                    "Whitening window {} closed, R[0]={:.3e}",
                    self.state.windows,
                    self.state.r[0]
                );
            }
        }

        let keep_from = history.len() - tail;
        self.state.xo.copy_from_slice(&history[keep_from..]);

        out
    }
}

impl Transform for Whitening {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        let samples = decode_samples(block)?;
        let whitened = self.process(&samples);
        log::debug!(
            "Whitened {} samples ({} analysis windows so far)",
            samples.len(),
            self.state.windows
        );
        Ok(encode_samples(&whitened))
    }
}
