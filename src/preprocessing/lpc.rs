//! Linear prediction: autocorrelation and Levinson–Durbin recursion
//!
//! Converts an autocorrelation sequence `R[0..=p]` into the coefficients of
//! a `p`-pole predictor `x̂[n] = Σ a[j]·x[n−j]`, following Durbin's recursion
//! as written on p. 411 of Rabiner & Schafer (1978).
//!
//! # Degenerate input
//!
//! When a step would drive the prediction error to zero or below (|kᵢ| ≥ 1,
//! typically a perfectly predictable signal such as a pure digital sine at
//! high order), the recursion stops and the coefficients of the last stable
//! order are returned. The truncation is visible through
//! [`LpcSolution::order`] and is logged at `warn` level.
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::preprocessing::lpc::{autocorrelation, durbin};
//!
//! let samples: Vec<f64> = (0..1000).map(|n| (n as f64 * 0.3).sin()).collect();
//! let r = autocorrelation(&samples, 2);
//! let lpc = durbin(&r)?;
//! assert_eq!(lpc.order, 2);
//! # Ok::<(), stratum_fingerprint::AnalysisError>(())
//! ```

use crate::error::AnalysisError;

/// Result of Durbin's recursion
#[derive(Debug, Clone, PartialEq)]
pub struct LpcSolution {
    /// Predictor coefficients, `coefficients[0]` unused (always 0), length p+1
    pub coefficients: Vec<f64>,
    /// Reflection coefficients k₁..k_order
    pub reflection: Vec<f64>,
    /// Prediction error after each completed step, starting with E₀ = R[0]
    pub prediction_errors: Vec<f64>,
    /// Highest order reached before the recursion stopped
    pub order: usize,
}

/// Biased short-time autocorrelation `R[i] = Σ_{j≥i} x[j]·x[j−i]` for lags `0..=max_lag`
pub fn autocorrelation(samples: &[f64], max_lag: usize) -> Vec<f64> {
    (0..=max_lag)
        .map(|lag| {
            if lag >= samples.len() {
                return 0.0;
            }
            samples[lag..]
                .iter()
                .zip(samples.iter())
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Levinson–Durbin recursion
///
/// # Arguments
///
/// * `r` - Autocorrelation sequence, `r.len() - 1` is the requested order
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` for an empty sequence and
/// `AnalysisError::NumericalError` if `r[0]` is not a positive finite
/// number (the recursion divides by it).
pub fn durbin(r: &[f64]) -> Result<LpcSolution, AnalysisError> {
    if r.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "Empty autocorrelation sequence".to_string(),
        ));
    }

    let r0 = r[0];
    if !(r0 > 0.0) || !r0.is_finite() {
        return Err(AnalysisError::NumericalError(format!(
            "Zero-lag autocorrelation must be positive and finite, got {}",
            r0
        )));
    }

    let requested = r.len() - 1;
    let mut a = vec![0.0f64; requested + 1];
    let mut reflection = Vec::with_capacity(requested);
    let mut prediction_errors = Vec::with_capacity(requested + 1);
    let mut e = r0;
    prediction_errors.push(e);

    let mut order = 0;
    for i in 1..=requested {
        let mut acc = r[i];
        for j in 1..i {
            acc -= a[j] * r[i - j];
        }
        let k = acc / e;
        let next_e = (1.0 - k * k) * e;

        if !k.is_finite() || k.abs() >= 1.0 || !(next_e > 0.0) {
            log::warn!(
                "Durbin recursion degenerate at order {} (k={}, E={}), truncating to order {}",
                i,
                k,
                e,
                order
            );
            break;
        }

        a[i] = k;
        for j in 1..=i / 2 {
            let aj = a[j];
            let aimj = a[i - j];
            a[j] = aj - k * aimj;
            a[i - j] = aimj - k * aj;
        }

        e = next_e;
        reflection.push(k);
        prediction_errors.push(e);
        order = i;
    }

    Ok(LpcSolution {
        coefficients: a,
        reflection,
        prediction_errors,
        order,
    })
}
