//! Fingerprint generation
//!
//! - Code type
//! - Fingerprint transform and its code stream

pub mod code;
pub mod fingerprinter;

pub use code::Code;
pub use fingerprinter::{CancelToken, CodeStream, Fingerprinter};
