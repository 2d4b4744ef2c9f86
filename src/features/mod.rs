//! Feature extraction modules
//!
//! - Subband analysis (8-band polyphase filterbank energies)
//! - Onset detection (adaptive threshold per band)
//! - Onset-pair hashing into fingerprint codes

pub mod hashing;
pub mod onset;
pub mod subband;
