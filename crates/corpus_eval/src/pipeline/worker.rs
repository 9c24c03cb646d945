//! src/pipeline/worker.rs
//!
//! The scoring worker loop.
//!
//! A worker owns a handle to the shared engine and loops:
//! pop a [`WorkMessage`], score it, push a [`WorkerOutcome`]. Engine errors
//! and panics are both turned into an [`ItemFailure`] for the sample at hand,
//! so one bad sample never takes a worker down.

use super::messages::{ItemFailure, ResultItem, WorkItem, WorkMessage, WorkerOutcome};
use super::thread::set_worker_id;
use crate::engine::ScoringEngine;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Received its sentinel.
    Sentinel,
    /// The pool shutdown flag was set.
    Shutdown,
    /// The work queue or the result queue was closed.
    Disconnected,
}

/// Decrements the pool's live-worker count when the worker thread ends,
/// including when it unwinds.
pub(crate) struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    pub(crate) fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) engine: Arc<dyn ScoringEngine>,
    pub(crate) work_rx: Receiver<WorkMessage>,
    pub(crate) result_tx: Sender<WorkerOutcome>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
}

impl Worker {
    /// Runs until a sentinel, shutdown or a closed queue.
    pub(crate) fn run(self, live: LiveGuard) -> WorkerExit {
        let _live = live;
        set_worker_id(self.id);
        let mut scored = 0usize;

        let exit = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break WorkerExit::Shutdown;
            }

            let item = match self.work_rx.recv_timeout(self.poll_interval) {
                Ok(WorkMessage::Item(item)) => item,
                Ok(WorkMessage::Sentinel) => break WorkerExit::Sentinel,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break self.closed(),
            };

            trace!(worker_id = self.id, index = item.index, "Scoring sample");
            let outcome = score_item(self.engine.as_ref(), self.id, item);
            if self.result_tx.send(outcome).is_err() {
                break self.closed();
            }
            scored += 1;
        };

        debug!(worker_id = self.id, scored, exit = ?exit, "Worker exiting");
        exit
    }

    /// A closed queue during shutdown counts as a shutdown exit; the pool
    /// sets the flag before it drops its channel ends.
    fn closed(&self) -> WorkerExit {
        if self.shutdown.load(Ordering::SeqCst) {
            WorkerExit::Shutdown
        } else {
            WorkerExit::Disconnected
        }
    }
}

/// Scores one item, converting errors and panics into an [`ItemFailure`].
pub(crate) fn score_item(
    engine: &dyn ScoringEngine,
    worker_id: usize,
    item: WorkItem,
) -> WorkerOutcome {
    let WorkItem { index, sample } = item;
    let result = panic::catch_unwind(AssertUnwindSafe(|| engine.evaluate(&sample)));

    let message = match result {
        Ok(Ok(score)) => return Ok(ResultItem::from_score(index, score)),
        Ok(Err(e)) => format!("{e:#}"),
        Err(payload) => format!("engine panicked: {}", panic_message(payload.as_ref())),
    };
    Err(ItemFailure {
        index,
        worker_id,
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
