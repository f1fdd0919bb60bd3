//! Acquisition producer.
//!
//! The producer owns the source, the decimator and the writer half of the
//! sample ring. One [`AcquisitionProducer::poll`] is one acquisition cycle:
//! read up to `burst` raw values, decimate, push. A read that fails simply
//! ends the cycle.
//!
//! [`AcquisitionProducer::spawn`] moves the producer onto a dedicated
//! thread that polls at a fixed interval. Stopping the returned
//! [`AcquisitionTask`] joins that thread and hands the producer back, so
//! the writer is never used after `stop` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use plotlink_core::{AcquisitionConfig, Decimator, SampleWriter};

use crate::source::{SampleSource, SourceError};

/// Errors from starting or stopping acquisition.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Acquisition thread panicked")]
    Panicked,
}

/// Counters of a running producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub cycles: u64,
    /// Raw values read from the source.
    pub raw_samples: u64,
    /// Decimated values pushed into the ring.
    pub pushed: u64,
    pub read_errors: u64,
}

/// Reads a source, decimates, fills the ring.
pub struct AcquisitionProducer<S: SampleSource> {
    source: S,
    writer: SampleWriter<S::Sample>,
    decimator: Decimator<S::Sample>,
    burst: usize,
    scratch: Vec<S::Sample>,
    stats: ProducerStats,
}

impl<S: SampleSource> AcquisitionProducer<S> {
    /// Initialize `source` and build a producer around it.
    ///
    /// When the source fails to start nothing else happens: no thread is
    /// started and the ring is never written.
    pub fn begin(
        mut source: S,
        writer: SampleWriter<S::Sample>,
        config: &AcquisitionConfig,
    ) -> Result<Self, AcquisitionError> {
        if let Err(e) = source.begin() {
            error!("Sample source failed to start: {}", e);
            return Err(e.into());
        }

        let burst = config.burst.max(1);
        info!(
            "Acquisition started (decimation {}, burst {})",
            config.decimation.max(1),
            burst
        );

        Ok(Self {
            source,
            writer,
            decimator: Decimator::new(config.decimation),
            burst,
            scratch: Vec::with_capacity(burst),
            stats: ProducerStats::default(),
        })
    }

    /// Run one acquisition cycle. Returns the number of values pushed.
    pub fn poll(&mut self) -> usize {
        self.stats.cycles += 1;
        self.scratch.clear();

        for _ in 0..self.burst {
            match self.source.read_raw() {
                Ok(raw) => {
                    self.stats.raw_samples += 1;
                    if let Some(value) = self.decimator.feed(raw) {
                        self.scratch.push(value);
                    }
                }
                Err(SourceError::NoData) => break,
                Err(e) => {
                    self.stats.read_errors += 1;
                    warn!("Sample read failed, skipping cycle: {}", e);
                    break;
                }
            }
        }

        if !self.scratch.is_empty() {
            self.writer.push(&self.scratch);
            self.stats.pushed += self.scratch.len() as u64;
        }
        self.scratch.len()
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn writer(&self) -> &SampleWriter<S::Sample> {
        &self.writer
    }

    /// Release the source and give back the writer.
    pub fn finish(mut self) -> (S, SampleWriter<S::Sample>) {
        self.source.end();
        debug!(
            "Acquisition finished after {} cycles, {} samples pushed",
            self.stats.cycles, self.stats.pushed
        );
        (self.source, self.writer)
    }

    /// Poll on a dedicated thread every `interval`.
    pub fn spawn(self, interval: Duration) -> Result<AcquisitionTask<S>, AcquisitionError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let mut producer = self;
                while running_clone.load(Ordering::Acquire) {
                    producer.poll();
                    thread::park_timeout(interval);
                }
                producer
            })?;

        Ok(AcquisitionTask {
            running,
            handle: Some(handle),
        })
    }
}

/// Handle to a producer running on its own thread.
pub struct AcquisitionTask<S: SampleSource> {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<AcquisitionProducer<S>>>,
}

impl<S: SampleSource> AcquisitionTask<S> {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and wait for the thread to exit.
    ///
    /// The producer is returned once it can no longer touch the ring.
    pub fn stop(mut self) -> Result<AcquisitionProducer<S>, AcquisitionError> {
        self.halt().ok_or(AcquisitionError::Panicked)
    }

    fn halt(&mut self) -> Option<AcquisitionProducer<S>> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        handle.thread().unpark();
        match handle.join() {
            Ok(producer) => {
                debug!("Acquisition thread stopped");
                Some(producer)
            }
            Err(_) => {
                error!("Acquisition thread panicked");
                None
            }
        }
    }
}

impl<S: SampleSource> Drop for AcquisitionTask<S> {
    fn drop(&mut self) {
        if let Some(producer) = self.halt() {
            producer.finish();
        }
    }
}
