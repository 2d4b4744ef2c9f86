//! Fingerprint transform
//!
//! `Fingerprinter` is a [`Transform`] that returns every block unchanged and
//! queues it for analysis: subband energies, onsets, then hash codes, which
//! are sent on a channel read through [`CodeStream`].
//!
//! Analysis state (filterbank carry, onset thresholds, retained onsets) spans
//! the whole stream, so each fingerprinter owns one worker thread that runs
//! its tasks in stream order. `compute` only enqueues and never waits; a slow
//! consumer stalls the worker, not the writer.
//!
//! Failures inside a task do not vanish: errors and panics are delivered on
//! the stream as `Err` items, after which the remaining tasks of the stream
//! are skipped.
//!
//! # Example
//!
//! ```
//! use stratum_fingerprint::analysis::fingerprinter::Fingerprinter;
//! use stratum_fingerprint::io::transform::Transform;
//! use stratum_fingerprint::FingerprintConfig;
//!
//! let config = FingerprintConfig {
//!     code_channel_capacity: None,
//!     ..FingerprintConfig::default()
//! };
//! let (mut fingerprinter, codes) = Fingerprinter::new(&config)?;
//! let block = vec![0u8; 20000];
//! assert_eq!(fingerprinter.compute(&block)?, block);
//! fingerprinter.finish()?;
//! drop(fingerprinter);
//! assert_eq!(codes.count(), 0);
//! # Ok::<(), stratum_fingerprint::AnalysisError>(())
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender};

use super::code::Code;
use crate::config::FingerprintConfig;
use crate::error::AnalysisError;
use crate::features::hashing::CodeEmitter;
use crate::features::onset::OnsetDetector;
use crate::features::subband::SubbandAnalyzer;
use crate::io::pcm::decode_samples;
use crate::io::transform::Transform;

/// How often a worker blocked on a full channel re-checks its cancellation token
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Numbers worker threads so they can be told apart in logs and debuggers
static NEXT_WORKER: AtomicU64 = AtomicU64::new(0);

/// Item carried by the code stream
pub type CodeResult = Result<Code, AnalysisError>;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Receiving end of a fingerprinter's codes
///
/// Iteration blocks until the next code arrives and ends once the
/// fingerprinter is dropped and its queued tasks are done.
#[derive(Debug)]
pub struct CodeStream {
    receiver: Receiver<CodeResult>,
}

impl CodeStream {
    /// Next item if one is ready, without blocking
    pub fn try_next(&self) -> Option<CodeResult> {
        self.receiver.try_recv().ok()
    }

    /// Collect every remaining code, stopping at the first error
    pub fn collect_codes(self) -> Result<Vec<Code>, AnalysisError> {
        self.collect()
    }
}

impl Iterator for CodeStream {
    type Item = CodeResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

struct StreamState {
    analyzer: SubbandAnalyzer,
    detector: OnsetDetector,
    emitter: CodeEmitter,
}

impl StreamState {
    fn block_codes(&mut self, samples: &[i16]) -> Result<Vec<Code>, AnalysisError> {
        let energies = self.analyzer.process(samples);
        let onsets = self.detector.process(&energies)?;
        let mut codes = Vec::new();
        for onset in onsets {
            codes.extend(self.emitter.push(onset.band, onset.frame)?);
        }
        Ok(codes)
    }
}

enum Job {
    Block(Vec<i16>),
    Finish,
    /// Answered once every earlier job is done
    Barrier(Sender<()>),
}

/// Owns the stream state and runs queued jobs in order
struct Worker {
    state: StreamState,
    sender: Sender<CodeResult>,
    cancel: CancelToken,
    /// Analysis tasks seen so far
    steps: u64,
    failed: bool,
    /// The code stream was dropped
    closed: bool,
}

impl Worker {
    fn new(
        config: &FingerprintConfig,
        sender: Sender<CodeResult>,
        cancel: CancelToken,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            state: StreamState {
                analyzer: SubbandAnalyzer::new(),
                detector: OnsetDetector::new(config.onset.clone())?,
                emitter: CodeEmitter::new(config.hash.clone(), config.sample_rate)?,
            },
            sender,
            cancel,
            steps: 0,
            failed: false,
            closed: false,
        })
    }

    fn run(mut self, jobs: Receiver<Job>) {
        for job in jobs {
            match job {
                Job::Block(samples) => self.step(|state| state.block_codes(&samples)),
                Job::Finish => self.step(|state| Ok(state.emitter.finish())),
                Job::Barrier(reached) => {
                    let _ = reached.send(());
                }
            }
        }
        log::debug!("Fingerprint worker exiting after {} tasks", self.steps);
    }

    /// Run one analysis task and deliver its codes
    ///
    /// A panic inside `analyse` is reported on the stream like an error.
    /// After the first failure every later task is skipped.
    fn step<F>(&mut self, analyse: F)
    where
        F: FnOnce(&mut StreamState) -> Result<Vec<Code>, AnalysisError>,
    {
        let index = self.steps;
        self.steps += 1;
        if self.failed || self.closed {
            return;
        }
        if self.cancel.is_cancelled() {
            log::debug!("Fingerprint task {} skipped: cancelled", index);
            return;
        }

        let state = &mut self.state;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyse(state))).unwrap_or_else(|_| {
            Err(AnalysisError::ProcessingError(format!(
                "Fingerprint task {} panicked",
                index
            )))
        });

        match outcome {
            Ok(codes) => {
                log::debug!("Fingerprint task {} emitting {} codes", index, codes.len());
                for code in codes {
                    if !self.deliver(Ok(code)) {
                        return;
                    }
                }
            }
            Err(err) => {
                log::warn!("Fingerprint task {} failed: {}", index, err);
                self.failed = true;
                self.deliver(Err(err));
            }
        }
    }

    /// Send one item, giving up if the stream is closed or the worker is cancelled
    fn deliver(&mut self, mut item: CodeResult) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.sender.send_timeout(item, CANCEL_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    log::debug!("Code stream closed, skipping remaining fingerprint tasks");
                    self.closed = true;
                    return false;
                }
            }
        }
    }
}

/// Streaming fingerprint transform
///
/// Dropping the fingerprinter lets its worker finish the queued tasks in the
/// background; the code stream ends after the last of them.
pub struct Fingerprinter {
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    cancel: CancelToken,
    tasks: u64,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("tasks", &self.tasks)
            .field("queued", &self.jobs.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Fingerprinter {
    /// Create a fingerprinter and the stream its codes arrive on
    ///
    /// Starts the fingerprinter's worker thread.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` if the configuration is invalid
    /// and `AnalysisError::ProcessingError` if the worker cannot be started.
    pub fn new(config: &FingerprintConfig) -> Result<(Self, CodeStream), AnalysisError> {
        config.validate()?;

        let (sender, receiver) = match config.code_channel_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let cancel = CancelToken::new();
        let worker = Worker::new(config, sender, cancel.clone())?;
        let (jobs, queue) = unbounded();

        let id = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("fingerprint-{}", id))
            .spawn(move || worker.run(queue))
            .map_err(|e| {
                AnalysisError::ProcessingError(format!("Failed to start fingerprint worker: {}", e))
            })?;

        Ok((
            Self {
                jobs,
                worker: Some(handle),
                cancel,
                tasks: 0,
            },
            CodeStream { receiver },
        ))
    }

    /// Token that stops this fingerprinter's tasks when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the running task at its next code and skip queued and later blocks
    pub fn cancel(&self) {
        log::warn!("Fingerprint analysis cancelled after {} tasks", self.tasks);
        self.cancel.cancel();
    }

    /// Number of tasks queued so far
    pub fn tasks_started(&self) -> u64 {
        self.tasks
    }

    /// Block until every task queued so far has finished
    ///
    /// With a bounded channel this waits for the consumer to take the codes.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::ProcessingError` if the worker thread died.
    pub fn wait(&mut self) -> Result<(), AnalysisError> {
        let (reached, done) = bounded(1);
        if self.jobs.send(Job::Barrier(reached)).is_ok() && done.recv().is_ok() {
            return Ok(());
        }

        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| {
                AnalysisError::ProcessingError("Fingerprint worker panicked".to_string())
            }),
            None => Ok(()),
        }
    }

    fn enqueue(&mut self, job: Job) -> Result<(), AnalysisError> {
        self.jobs.send(job).map_err(|_| {
            AnalysisError::ProcessingError("Fingerprint worker is no longer running".to_string())
        })?;
        self.tasks += 1;
        Ok(())
    }
}

impl Transform for Fingerprinter {
    fn compute(&mut self, block: &[u8]) -> Result<Vec<u8>, AnalysisError> {
        let samples = decode_samples(block)?;
        if self.cancel.is_cancelled() {
            log::debug!("Fingerprinting cancelled, passing {} samples through", samples.len());
        } else {
            self.enqueue(Job::Block(samples))?;
        }
        Ok(block.to_vec())
    }

    fn finish(&mut self) -> Result<Vec<u8>, AnalysisError> {
        if !self.cancel.is_cancelled() {
            self.enqueue(Job::Finish)?;
        }
        Ok(Vec::new())
    }
}
