//! Block transform capability shared by every pipeline stage

use crate::error::AnalysisError;

/// A signal-processing stage applied to PCM blocks before they are forwarded
///
/// `compute` receives an even-length block of little-endian i16 samples and
/// returns a block in the same encoding. Implementations must not depend on
/// where the stream was cut into blocks: any state needed to continue the
/// signal lives in the implementor and is carried from call to call.
pub trait Transform {
    /// Transform one block
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError>;

    /// End-of-stream hook; returns any trailing output
    fn finish(&mut self) -> Result<Vec<u8>, AnalysisError> {
        Ok(Vec::new())
    }
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        (**self).compute(block)
    }

    fn finish(&mut self) -> Result<Vec<u8>, AnalysisError> {
        (**self).finish()
    }
}

impl<T: Transform + ?Sized> Transform for &mut T {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        (**self).compute(block)
    }

    fn finish(&mut self) -> Result<Vec<u8>, AnalysisError> {
        (**self).finish()
    }
}

/// Identity transform
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        Ok(block.to_vec())
    }
}

/// Two stages run back to back: the output of `first` feeds `second`
#[derive(Debug)]
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A: Transform, B: Transform> Chain<A, B> {
    /// Compose two stages
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Upstream stage
    pub fn first(&self) -> &A {
        &self.first
    }

    /// Downstream stage
    pub fn second(&self) -> &B {
        &self.second
    }

    /// Split the chain back into its stages
    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Transform, B: Transform> Transform for Chain<A, B> {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        let intermediate = self.first.compute(block)?;
        self.second.compute(&intermediate)
    }

    fn finish(&mut self) -> Result<Vec<u8>, AnalysisError> {
        let tail = self.first.finish()?;
        let mut out = if tail.is_empty() {
            Vec::new()
        } else {
            self.second.compute(&tail)?
        };
        out.extend(self.second.finish()?);
        Ok(out)
    }
}
