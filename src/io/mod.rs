//! Byte-stream plumbing
//!
//! PCM encoding, the block `Transform` capability and the buffered
//! `TransformSink` that drives transforms from a byte stream.

pub mod pcm;
pub mod sink;
pub mod transform;
