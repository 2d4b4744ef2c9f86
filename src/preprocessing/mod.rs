//! Signal conditioning ahead of feature extraction
//!
//! - Linear prediction (autocorrelation, Levinson–Durbin)
//! - Adaptive LPC whitening

pub mod lpc;
pub mod whitening;

pub use whitening::{FilterState, Whitening, WhiteningConfig};
