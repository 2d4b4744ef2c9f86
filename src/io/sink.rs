//! Buffered writer that runs a [`Transform`] on each block before forwarding it
//!
//! `TransformSink` accumulates bytes into a fixed-capacity buffer. When the
//! buffer fills (or on an explicit flush) the buffered samples are passed
//! through the transform and the result is written to the wrapped sink.
//!
//! # Error policy
//!
//! - The first I/O, transform or no-progress failure is sticky: it is stored
//!   and returned by every later call without touching the underlying sink.
//! - A short write (the sink accepts fewer bytes than offered without
//!   failing) is recoverable. The transformed bytes that were not accepted
//!   stay queued at the front of the sink and are delivered before anything
//!   else on the next flush. They are never transformed twice.
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::io::sink::TransformSink;
//! use stratum_fingerprint::io::transform::Passthrough;
//!
//! let mut sink = TransformSink::new(Vec::new(), Passthrough);
//! sink.write(&[1, 0, 2, 0])?;
//! assert_eq!(sink.buffered(), 4);
//! let out = sink.finish()?;
//! assert_eq!(out, vec![1, 0, 2, 0]);
//! # Ok::<(), stratum_fingerprint::StreamError>(())
//! ```

use std::io::{self, Read, Write};

use super::pcm::BYTES_PER_SAMPLE;
use super::transform::Transform;
use crate::error::StreamError;

/// Default buffer capacity in bytes (5000 samples)
pub const DEFAULT_BUFFER_SIZE: usize = 10000;

/// Consecutive empty reads tolerated before `read_from` gives up
pub const MAX_CONSECUTIVE_EMPTY_READS: usize = 100;

/// Streaming transform sink
///
/// Not thread-safe by design: `write`, `flush` and `read_from` take
/// `&mut self` and own the buffer exclusively.
#[derive(Debug)]
pub struct TransformSink<W, T> {
    inner: W,
    transform: T,
    /// Raw input waiting for the transform
    buf: Vec<u8>,
    capacity: usize,
    /// Transformed output the sink has not accepted yet
    pending: Vec<u8>,
    /// Bytes pulled from readers by `read_from`, across calls
    read_total: u64,
    err: Option<StreamError>,
}

impl<W: Write, T: Transform> TransformSink<W, T> {
    /// Create a sink with the default buffer capacity
    pub fn new(inner: W, transform: T) -> Self {
        Self {
            inner,
            transform,
            buf: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            capacity: DEFAULT_BUFFER_SIZE,
            pending: Vec::new(),
            read_total: 0,
            err: None,
        }
    }

    /// Create a sink with an explicit buffer capacity
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidConfig` if `capacity` is zero or not a
    /// whole number of samples.
    pub fn with_capacity(capacity: usize, inner: W, transform: T) -> Result<Self, StreamError> {
        if capacity == 0 || capacity % BYTES_PER_SAMPLE != 0 {
            return Err(StreamError::InvalidConfig(format!(
                "Buffer capacity must be a positive multiple of {} bytes, got {}",
                BYTES_PER_SAMPLE, capacity
            )));
        }

        Ok(Self {
            inner,
            transform,
            buf: Vec::with_capacity(capacity),
            capacity,
            pending: Vec::new(),
            read_total: 0,
            err: None,
        })
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes held by the sink (untransformed input plus
    /// transformed output awaiting delivery)
    pub fn buffered(&self) -> usize {
        self.buf.len() + self.pending.len()
    }

    /// Number of bytes that can be written before the buffer is full
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.buffered())
    }

    /// Transformed bytes the underlying sink has not accepted yet
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Total bytes taken from readers by [`read_from`](Self::read_from)
    ///
    /// Counts every byte read, including those of a call that returned an
    /// error; such bytes are still held by the sink.
    pub fn bytes_read(&self) -> u64 {
        self.read_total
    }

    /// Reference to the wrapped byte sink
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Reference to the transform
    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Mutable reference to the transform
    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    /// Write bytes into the sink
    ///
    /// Returns the number of bytes taken into the sink's custody. As with
    /// [`std::io::Write::write`], a count lower than `data.len()` means the
    /// underlying sink stalled; the caller retries the rest later. An error is
    /// only returned when no byte at all could be taken, or when the sink is
    /// in a sticky error state.
    pub fn write(&mut self, mut data: &[u8]) -> Result<usize, StreamError> {
        self.check()?;

        let mut written = 0;
        while data.len() > self.available() {
            let result = if self.buffered() == 0 {
                // Large write, empty buffer: transform straight from the caller's slice
                let whole = data.len() - data.len() % BYTES_PER_SAMPLE;
                self.pending = self.apply(&data[..whole])?;
                written += whole;
                data = &data[whole..];
                self.deliver()
            } else {
                let n = self.available().min(data.len());
                self.buf.extend_from_slice(&data[..n]);
                written += n;
                data = &data[n..];
                self.flush()
            };

            if let Err(err) = result {
                if err.is_recoverable() && written > 0 {
                    return Ok(written);
                }
                return Err(err);
            }
        }

        self.buf.extend_from_slice(data);
        written += data.len();
        Ok(written)
    }

    /// Transform every buffered whole sample and forward the result
    ///
    /// Output left over from an earlier short write is delivered first. A
    /// trailing odd byte stays buffered until the rest of its sample arrives.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.check()?;
        self.deliver()?;

        let whole = self.buf.len() - self.buf.len() % BYTES_PER_SAMPLE;
        if whole == 0 {
            return Ok(());
        }

        let out = match self.transform.compute(&self.buf[..whole]) {
            Ok(out) => out,
            Err(err) => return Err(self.fail(err.into())),
        };
        self.buf.drain(..whole);
        self.pending = out;
        self.deliver()
    }

    /// Pull bytes from `reader` until end-of-stream
    ///
    /// `Ok(0)` from the reader marks end-of-stream. `WouldBlock` and
    /// `Interrupted` count as reads that made no progress; after
    /// [`MAX_CONSECUTIVE_EMPTY_READS`] of them in a row the sink fails with
    /// `StreamError::NoProgress`. If end-of-stream arrives with the buffer
    /// exactly full it is flushed before returning; otherwise the remaining
    /// bytes stay buffered.
    ///
    /// Returns the number of bytes read by this call. A recoverable
    /// `ShortWrite` can interrupt the loop; the bytes read so far are then
    /// buffered, [`bytes_read`](Self::bytes_read) accounts for them, and
    /// calling `read_from` again with the same reader resumes.
    pub fn read_from<R: Read>(&mut self, mut reader: R) -> Result<u64, StreamError> {
        self.check()?;

        let mut total: u64 = 0;
        loop {
            if self.available() == 0 {
                self.flush()?;
            }

            let start = self.buf.len();
            let room = self.available();
            self.buf.resize(start + room, 0);

            let mut attempts = 0;
            let read = loop {
                match reader.read(&mut self.buf[start..]) {
                    Ok(n) => break n,
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) =>
                    {
                        attempts += 1;
                        if attempts >= MAX_CONSECUTIVE_EMPTY_READS {
                            self.buf.truncate(start);
                            return Err(self.fail(StreamError::NoProgress { attempts }));
                        }
                    }
                    Err(err) => {
                        self.buf.truncate(start);
                        return Err(self.fail(err.into()));
                    }
                }
            };

            self.buf.truncate(start + read);
            if read == 0 {
                break;
            }
            total += read as u64;
            self.read_total += read as u64;
        }

        if self.available() == 0 {
            self.flush()?;
        }

        log::debug!("read_from consumed {} bytes, {} still buffered", total, self.buffered());
        Ok(total)
    }

    /// Flush, run the transform's end-of-stream hook and return the byte sink
    ///
    /// A dangling odd byte cannot form a sample and is dropped.
    pub fn finish(mut self) -> Result<W, StreamError> {
        self.flush()?;

        let tail = match self.transform.finish() {
            Ok(tail) => tail,
            Err(err) => return Err(self.fail(err.into())),
        };
        self.pending.extend(tail);
        self.deliver()?;

        if !self.buf.is_empty() {
            log::warn!("Dropping {} byte(s) that do not form a whole sample", self.buf.len());
        }

        if let Err(err) = self.inner.flush() {
            return Err(self.fail(err.into()));
        }
        Ok(self.inner)
    }

    /// Split the sink into its byte sink and transform, discarding buffered data
    pub fn into_parts(self) -> (W, T) {
        (self.inner, self.transform)
    }

    fn check(&self) -> Result<(), StreamError> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn apply(&mut self, block: &[u8]) -> Result<Vec<u8>, StreamError> {
        match self.transform.compute(block) {
            Ok(out) => Ok(out),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Offer the pending output to the byte sink once
    fn deliver(&mut self) -> Result<(), StreamError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let written = match self.inner.write(&self.pending) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(self.fail(err.into())),
        };

        if written >= self.pending.len() {
            self.pending.clear();
            return Ok(());
        }

        self.pending.drain(..written);
        log::warn!(
            "Short write: sink accepted {} bytes, {} requeued",
            written,
            self.pending.len()
        );
        Err(StreamError::ShortWrite {
            written,
            pending: self.pending.len(),
        })
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        log::debug!("Transform sink entering error state: {}", err);
        self.err = Some(err.clone());
        err
    }
}

impl<W: Write, T: Transform> Write for TransformSink<W, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TransformSink::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        TransformSink::flush(self)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::io::transform::Passthrough;
    use std::io::Cursor;

    /// Byte sink that follows a script of per-call limits
    #[derive(Default)]
    struct ScriptedSink {
        data: Vec<u8>,
        calls: usize,
        /// Per-call behaviour: `Some(n)` accepts at most n bytes, `None` fails
        script: Vec<Option<usize>>,
    }

    impl Write for ScriptedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let step = self.script.get(self.calls).copied().unwrap_or(Some(usize::MAX));
            self.calls += 1;
            match step {
                Some(limit) => {
                    let n = limit.min(buf.len());
                    self.data.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records the size of every block it sees
    #[derive(Default)]
    struct BlockLog {
        blocks: Vec<usize>,
    }

    impl Transform for BlockLog {
        fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
            self.blocks.push(block.len());
            Ok(block.to_vec())
        }
    }

    /// Reader that never makes progress
    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "nothing yet"))
        }
    }

    fn bytes(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        assert!(TransformSink::with_capacity(0, Vec::new(), Passthrough).is_err());
        assert!(TransformSink::with_capacity(7, Vec::new(), Passthrough).is_err());
        assert!(TransformSink::with_capacity(8, Vec::new(), Passthrough).is_ok());
    }

    #[test]
    fn test_small_writes_are_buffered() {
        let mut sink = TransformSink::with_capacity(16, Vec::new(), Passthrough).unwrap();
        assert_eq!(sink.write(&bytes(6)).unwrap(), 6);
        assert_eq!(sink.buffered(), 6);
        assert_eq!(sink.available(), 10);
        assert!(sink.get_ref().is_empty());

        sink.flush().unwrap();
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.get_ref(), &bytes(6));
    }

    #[test]
    fn test_fill_triggers_flush() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), BlockLog::default()).unwrap();
        let data = bytes(12);
        sink.write(&data[..6]).unwrap();
        sink.write(&data[6..]).unwrap();

        // First 8 bytes went through as one full block, 4 remain buffered
        assert_eq!(sink.transform().blocks, vec![8]);
        assert_eq!(sink.buffered(), 4);
        let (out, _) = sink.into_parts();
        assert_eq!(out, data[..8].to_vec());
    }

    #[test]
    fn test_large_write_bypasses_buffer() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), BlockLog::default()).unwrap();
        let data = bytes(40);
        assert_eq!(sink.write(&data).unwrap(), 40);
        assert_eq!(sink.transform().blocks, vec![40]);
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.get_ref(), &data);
    }

    #[test]
    fn test_odd_byte_waits_for_its_sample() {
        let mut sink = TransformSink::with_capacity(16, Vec::new(), BlockLog::default()).unwrap();
        sink.write(&bytes(5)).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.transform().blocks, vec![4]);
        assert_eq!(sink.buffered(), 1);

        sink.write(&[9]).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.transform().blocks, vec![4, 2]);
        assert_eq!(sink.buffered(), 0);
    }

    #[test]
    fn test_sticky_error() {
        let target = ScriptedSink {
            script: vec![None],
            ..Default::default()
        };
        let mut sink = TransformSink::with_capacity(8, target, Passthrough).unwrap();
        sink.write(&bytes(4)).unwrap();

        let first = sink.flush().unwrap_err();
        assert!(matches!(first, StreamError::Io(_)));
        assert_eq!(sink.get_ref().calls, 1);

        // Every later call reports the same failure without touching the sink
        let again = sink.write(&bytes(2)).unwrap_err();
        assert_eq!(again.to_string(), first.to_string());
        let again = sink.flush().unwrap_err();
        assert_eq!(again.to_string(), first.to_string());
        let again = sink.read_from(Cursor::new(bytes(4))).unwrap_err();
        assert_eq!(again.to_string(), first.to_string());
        assert_eq!(sink.get_ref().calls, 1);
    }

    #[test]
    fn test_short_write_requeues_remainder() {
        let target = ScriptedSink {
            script: vec![Some(3)],
            ..Default::default()
        };
        let data = bytes(10);
        let mut sink = TransformSink::with_capacity(16, target, BlockLog::default()).unwrap();
        sink.write(&data).unwrap();

        let err = sink.flush().unwrap_err();
        assert!(matches!(err, StreamError::ShortWrite { written: 3, pending: 7 }));
        assert_eq!(sink.pending(), &data[3..]);
        assert_eq!(sink.buffered(), 7);

        // The remainder goes out byte for byte, without a second transform pass
        sink.flush().unwrap();
        assert_eq!(sink.get_ref().data, data);
        assert_eq!(sink.transform().blocks, vec![10]);
        assert_eq!(sink.buffered(), 0);
    }

    #[test]
    fn test_short_write_is_not_sticky() {
        let target = ScriptedSink {
            script: vec![Some(0), Some(0)],
            ..Default::default()
        };
        let mut sink = TransformSink::with_capacity(4, target, Passthrough).unwrap();
        let data = bytes(8);

        // Nothing can be delivered: the first write stalls after taking a block
        assert_eq!(sink.write(&data).unwrap(), 8);
        assert!(matches!(sink.write(&data).unwrap_err(), StreamError::ShortWrite { .. }));

        // The sink recovers: the queued block goes first, then the buffer
        sink.flush().unwrap();
        assert_eq!(sink.get_ref().data, data);
    }

    #[test]
    fn test_read_from_exact_fill_flushes() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), Passthrough).unwrap();
        let data = bytes(16);
        assert_eq!(sink.read_from(Cursor::new(data.clone())).unwrap(), 16);
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.get_ref(), &data);
    }

    #[test]
    fn test_read_from_partial_buffer_is_clean_eof() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), Passthrough).unwrap();
        let data = bytes(12);
        assert_eq!(sink.read_from(Cursor::new(data.clone())).unwrap(), 12);
        assert_eq!(sink.buffered(), 4);
        assert_eq!(sink.get_ref(), &data[..8].to_vec());

        let out = sink.finish().unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_read_from_short_write_keeps_count() {
        let inner = ScriptedSink {
            script: vec![Some(3)],
            ..ScriptedSink::default()
        };
        let mut sink = TransformSink::with_capacity(8, inner, Passthrough).unwrap();
        let data = bytes(40);
        let mut reader = Cursor::new(data.clone());

        let err = sink.read_from(&mut reader).unwrap_err();
        assert!(matches!(err, StreamError::ShortWrite { written: 3, pending: 5 }));
        assert_eq!(sink.bytes_read(), reader.position());
        assert_eq!(sink.bytes_read(), 8);

        sink.read_from(&mut reader).unwrap();
        assert_eq!(sink.bytes_read(), 40);
        assert_eq!(sink.finish().unwrap().data, data);
    }

    #[test]
    fn test_read_from_no_progress() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), Passthrough).unwrap();
        let err = sink.read_from(Stalled).unwrap_err();
        assert!(matches!(
            err,
            StreamError::NoProgress {
                attempts: MAX_CONSECUTIVE_EMPTY_READS
            }
        ));
        // Terminal: the sink stays failed
        assert!(matches!(sink.flush().unwrap_err(), StreamError::NoProgress { .. }));
    }

    #[test]
    fn test_transform_error_is_sticky() {
        struct Reject;
        impl Transform for Reject {
            fn compute(&mut self, _block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
                Err(AnalysisError::ProcessingError("rejected".to_string()))
            }
        }

        let mut sink = TransformSink::with_capacity(4, Vec::new(), Reject).unwrap();
        let err = sink.write(&bytes(8)).unwrap_err();
        assert!(matches!(err, StreamError::Transform(_)));
        assert!(matches!(sink.flush().unwrap_err(), StreamError::Transform(_)));
    }

    #[test]
    fn test_io_write_adapter() {
        let mut sink = TransformSink::with_capacity(8, Vec::new(), Passthrough).unwrap();
        let data = bytes(20);
        io::copy(&mut Cursor::new(data.clone()), &mut sink).unwrap();
        Write::flush(&mut sink).unwrap();
        assert_eq!(sink.get_ref(), &data);
    }
}
