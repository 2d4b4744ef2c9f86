//! Fingerprint code type

use serde::{Deserialize, Serialize};

/// One fingerprint code
///
/// Codes are emitted band by band as onsets become available, so a stream
/// of codes carries no particular ordering. Sort by `(time, hash)` when a
/// canonical order is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Code {
    /// Onset time in milliseconds, quantized to 256-sample (≈23.2 ms) steps
    pub time: u32,

    /// 20-bit hash of the quantized onset deltas and band index
    pub hash: u32,
}

impl Code {
    /// Create a code
    pub fn new(time: u32, hash: u32) -> Self {
        Self { time, hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_ordering() {
        let mut codes = vec![Code::new(46, 3), Code::new(23, 9), Code::new(23, 1)];
        codes.sort();
        assert_eq!(codes, vec![Code::new(23, 1), Code::new(23, 9), Code::new(46, 3)]);
    }

    #[test]
    fn test_code_serialization() {
        let code = Code::new(1045, 0x000c_2048);
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#"{"time":1045,"hash":794696}"#);
        let back: Code = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }
}
