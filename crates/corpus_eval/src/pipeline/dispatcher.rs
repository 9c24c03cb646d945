//! src/pipeline/dispatcher.rs
//!
//! Numbers corpus samples `0..N-1` in stream order, feeds them to the work
//! queue, then sends one sentinel per worker.
//!
//! The dispatcher runs on its own thread so the collector can drain results
//! while dispatch is still blocked on a full work queue. It reports exactly
//! once on a side channel: the number of samples dispatched, or the error
//! that stopped it.

use super::messages::{WorkItem, WorkMessage};
use super::pool::ShutdownHandle;
use crate::corpus::SampleStream;
use crate::error::{EvalError, Result};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Dispatcher → collector report.
pub(crate) type DispatchReport = Result<usize>;

pub(crate) struct Dispatcher {
    work_tx: Sender<WorkMessage>,
    num_workers: usize,
    shutdown: ShutdownHandle,
    poll_interval: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        work_tx: Sender<WorkMessage>,
        num_workers: usize,
        shutdown: ShutdownHandle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            work_tx,
            num_workers,
            shutdown,
            poll_interval,
        }
    }

    pub(crate) fn spawn(
        self,
        samples: SampleStream,
        expected: usize,
        report_tx: Sender<DispatchReport>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("eval-dispatcher".to_string())
            .spawn(move || {
                let report = self.dispatch(samples, expected);
                if let Err(e) = &report {
                    warn!(error = %e, "Dispatch stopped");
                }
                // Report before closing the work queue, so the report is
                // already queued when workers start exiting on disconnect.
                let _ = report_tx.send(report);
                drop(self);
            })
            .map_err(|e| EvalError::Spawn(format!("dispatcher thread: {}", e)))
    }

    /// Sends `expected` items then one sentinel per worker.
    pub(crate) fn dispatch(&self, samples: SampleStream, expected: usize) -> Result<usize> {
        let mut dispatched = 0usize;
        for (index, sample) in samples.enumerate() {
            let sample = sample.map_err(|e| EvalError::Corpus {
                index,
                message: format!("{e:#}"),
            })?;
            if index >= expected {
                return Err(EvalError::CorpusLengthMismatch {
                    declared: expected,
                    actual: index + 1,
                });
            }
            self.send(WorkMessage::Item(WorkItem { index, sample }), dispatched, expected)?;
            dispatched += 1;
        }

        if dispatched != expected {
            return Err(EvalError::CorpusLengthMismatch {
                declared: expected,
                actual: dispatched,
            });
        }

        for _ in 0..self.num_workers {
            self.send(WorkMessage::Sentinel, dispatched, expected)?;
        }
        debug!(dispatched, sentinels = self.num_workers, "Dispatch complete");
        Ok(dispatched)
    }

    /// Blocks while the queue is full, but wakes every poll interval to
    /// honour shutdown.
    fn send(&self, message: WorkMessage, dispatched: usize, expected: usize) -> Result<()> {
        let mut message = message;
        loop {
            match self.work_tx.send_timeout(message, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shutdown.is_shutdown() {
                        return Err(EvalError::Interrupted {
                            received: dispatched,
                            expected,
                        });
                    }
                    message = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) if self.shutdown.is_shutdown() => {
                    return Err(EvalError::Interrupted {
                        received: dispatched,
                        expected,
                    });
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(EvalError::PoolExhausted {
                        live: 0,
                        received: dispatched,
                        expected,
                    });
                }
            }
        }
    }
}
