//! # Stratum Fingerprint
//!
//! Streaming audio fingerprinting after the Echoprint design: raw PCM goes
//! in, compact `(time, hash)` codes for content identification come out.
//!
//! ## Features
//!
//! - **Transform sink**: buffered `io::Write` adapter that runs a block
//!   transform before forwarding, with sticky errors and short-write recovery
//! - **Whitening**: adaptive 40-pole LPC inverse filter with state carried
//!   across blocks
//! - **Subband onsets**: 8-band polyphase filterbank with adaptive-threshold
//!   onset detection per band
//! - **Codes**: onset-pair intervals hashed with MurmurHash2, streamed from a
//!   background task with cancellation
//!
//! ## Quick Start
//!
//! ```
//! use stratum_fingerprint::{fingerprint_pcm, FingerprintConfig};
//!
//! // Mono, signed 16-bit little-endian PCM at 11025 Hz
//! let pcm = vec![0u8; 11025 * 2 * 3];
//! let codes = fingerprint_pcm(&pcm, &FingerprintConfig::default())?;
//! assert!(codes.is_empty()); // silence has no onsets
//! # Ok::<(), stratum_fingerprint::StreamError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! bytes → TransformSink → Whitening → Fingerprinter → bytes (unchanged)
//!                                          └→ CodeStream
//! ```
//!
//! Stages implement [`Transform`](io::transform::Transform) and compose with
//! [`Chain`](io::transform::Chain). Each stage keeps its own stream state;
//! use one pipeline per stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod features;
pub mod io;
pub mod preprocessing;

// Re-export main types
pub use analysis::{CancelToken, Code, CodeStream, Fingerprinter};
pub use config::FingerprintConfig;
pub use error::{AnalysisError, StreamError};
pub use io::sink::TransformSink;
pub use io::transform::{Chain, Passthrough, Transform};
pub use preprocessing::whitening::Whitening;

/// Fingerprint a complete PCM buffer
///
/// Runs whitening and fingerprinting through a [`TransformSink`] and
/// collects every code. The code channel is unbounded for this call
/// regardless of `config.code_channel_capacity`.
///
/// # Arguments
///
/// * `pcm` - Mono signed 16-bit little-endian samples at `config.sample_rate`
/// * `config` - Fingerprinting configuration
///
/// # Returns
///
/// All codes, sorted by time then hash
///
/// # Errors
///
/// Returns `StreamError::Transform` for an invalid configuration or a failed
/// analysis task, and `StreamError::InvalidConfig` for a bad buffer size.
pub fn fingerprint_pcm(pcm: &[u8], config: &FingerprintConfig) -> Result<Vec<Code>, StreamError> {
    let config = FingerprintConfig {
        code_channel_capacity: None,
        ..config.clone()
    };

    log::debug!(
        "Fingerprinting {} bytes at {} Hz, buffer {} bytes",
        pcm.len(),
        config.sample_rate,
        config.buffer_size
    );

    let whitening = Whitening::new(config.whitening.clone())?;
    let (fingerprinter, stream) = Fingerprinter::new(&config)?;
    let mut sink = TransformSink::with_capacity(
        config.buffer_size,
        std::io::sink(),
        Chain::new(whitening, fingerprinter),
    )?;

    sink.read_from(pcm)?;
    sink.finish()?;

    let mut codes = stream.collect_codes()?;
    codes.sort_unstable();

    log::debug!("Fingerprint produced {} codes", codes.len());
    Ok(codes)
}
