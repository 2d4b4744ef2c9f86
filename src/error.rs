//! Error types for the fingerprinting pipeline

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur while analysing audio
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough samples to produce a single analysis frame
    #[error("Insufficient samples: need at least {needed}, got {got}")]
    InsufficientSamples {
        /// Minimum number of samples required
        needed: usize,
        /// Number of samples supplied
        got: usize,
    },

    /// Numerical error (degenerate recursion, non-finite values, etc.)
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Processing error during analysis
    #[error("Processing error: {0}")]
    ProcessingError(String),

    /// Analysis was stopped through its cancellation token
    #[error("Analysis cancelled")]
    Cancelled,
}

/// Errors surfaced by [`TransformSink`](crate::io::sink::TransformSink)
///
/// `Io`, `NoProgress` and `Transform` are sticky: once one is returned the
/// sink refuses further work and keeps returning it. `ShortWrite` is
/// recoverable; the undelivered bytes are retried on the next flush.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The underlying byte sink or source failed
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The byte sink accepted fewer bytes than it was offered
    #[error("Short write: {written} bytes written, {pending} pending")]
    ShortWrite {
        /// Bytes accepted by the sink in this attempt
        written: usize,
        /// Bytes still queued for delivery
        pending: usize,
    },

    /// The byte source kept returning no data without reaching end-of-stream
    #[error("No progress after {attempts} consecutive empty reads")]
    NoProgress {
        /// Number of consecutive empty reads
        attempts: usize,
    },

    /// The transform rejected a block
    #[error("Transform failed: {0}")]
    Transform(#[from] AnalysisError),

    /// The sink was constructed with an unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(Arc::new(err))
    }
}

impl StreamError {
    /// Whether the sink stays usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StreamError::ShortWrite { .. })
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Io(inner) => return io::Error::new(inner.kind(), inner.to_string()),
            StreamError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            StreamError::NoProgress { .. } => io::ErrorKind::UnexpectedEof,
            StreamError::Transform(_) => io::ErrorKind::InvalidData,
            StreamError::InvalidConfig(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_recoverability() {
        assert!(StreamError::ShortWrite { written: 1, pending: 3 }.is_recoverable());
        assert!(!StreamError::NoProgress { attempts: 100 }.is_recoverable());
        let io_err: StreamError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(!io_err.is_recoverable());
    }

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let err: StreamError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
        assert!(back.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::InsufficientSamples { needed: 135, got: 10 };
        assert_eq!(err.to_string(), "Insufficient samples: need at least 135, got 10");
    }
}
