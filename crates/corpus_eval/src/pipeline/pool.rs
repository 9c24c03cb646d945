//! src/pipeline/pool.rs
//!
//! Worker pool lifecycle.
//!
//! `PoolManager` spawns a fixed set of long-lived scoring workers, owns
//! their join handles in a registry keyed by worker id, and is the one place
//! that knows how to stop them.
//!
//! # Key features
//! - Bounded work and result queues
//! - Live-worker tracking for pool exhaustion detection
//! - Cloneable [`ShutdownHandle`] for interrupt handlers
//! - Bounded-time teardown on `shutdown_all` and on drop

use super::config::PipelineConfig;
use super::messages::{WorkMessage, WorkerOutcome};
use super::worker::{LiveGuard, Worker, WorkerExit};
use crate::engine::ScoringEngine;
use crate::error::{EvalError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often `join_all`/`shutdown_all` re-check unfinished workers.
const JOIN_POLL_INTERVAL_MS: u64 = 5;

/// Sets the pool's shutdown flag from anywhere, e.g. a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Worker exit accounting, returned by [`PoolManager::shutdown_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub spawned: usize,
    pub sentinel_exits: usize,
    pub shutdown_exits: usize,
    pub disconnected_exits: usize,
    pub panicked: usize,
    /// Workers still running after the grace period, unregistered without a join.
    pub detached: usize,
    /// Live worker threads at the time the stats were taken.
    pub live: usize,
}

impl PoolStats {
    /// Workers that were joined, whatever the reason they stopped.
    pub fn terminated(&self) -> usize {
        self.sentinel_exits + self.shutdown_exits + self.disconnected_exits + self.panicked
    }

    fn record(&mut self, exit: WorkerExit) {
        match exit {
            WorkerExit::Sentinel => self.sentinel_exits += 1,
            WorkerExit::Shutdown => self.shutdown_exits += 1,
            WorkerExit::Disconnected => self.disconnected_exits += 1,
        }
    }
}

/// Owner of the scoring workers.
///
/// Manages worker lifecycle and communication through bounded channels:
/// - Work queue: dispatcher -> workers
/// - Result queue: workers -> collector
/// - Shutdown flag: unconditional termination
pub struct PoolManager {
    workers: HashMap<usize, JoinHandle<WorkerExit>>,
    work_tx: Option<Sender<WorkMessage>>,
    result_rx: Option<Receiver<WorkerOutcome>>,
    shutdown: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
    stats: PoolStats,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl PoolManager {
    /// Spawns the configured number of workers, all sharing `engine`.
    pub fn spawn(engine: Arc<dyn ScoringEngine>, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let num_workers = config.resolved_workers();

        let (work_tx, work_rx) = bounded(config.queue_capacity);
        let (result_tx, result_rx) = bounded(config.result_capacity);

        let mut pool = Self {
            workers: HashMap::with_capacity(num_workers),
            work_tx: Some(work_tx),
            result_rx: Some(result_rx),
            shutdown: Arc::new(AtomicBool::new(false)),
            live: Arc::new(AtomicUsize::new(0)),
            stats: PoolStats::default(),
            poll_interval: config.worker_poll_interval,
            shutdown_grace: config.shutdown_grace,
        };

        // On a spawn failure `pool` is dropped, which stops the workers
        // already started.
        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                engine: engine.clone(),
                work_rx: work_rx.clone(),
                result_tx: result_tx.clone(),
                shutdown: pool.shutdown.clone(),
                poll_interval: config.worker_poll_interval,
            };
            let live = LiveGuard::new(pool.live.clone());

            let handle = thread::Builder::new()
                .name(format!("eval-worker-{}", worker_id))
                .spawn(move || worker.run(live))
                .map_err(|e| EvalError::Spawn(format!("worker thread {}: {}", worker_id, e)))?;

            pool.workers.insert(worker_id, handle);
            pool.stats.spawned += 1;
        }

        info!(
            workers = num_workers,
            model_type = engine.model_type(),
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.stats.spawned
    }

    /// Worker threads that have not yet finished.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Workers still held in the handle registry.
    pub fn registered(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn take_work_sender(&mut self) -> Option<Sender<WorkMessage>> {
        self.work_tx.take()
    }

    pub(crate) fn take_result_receiver(&mut self) -> Option<Receiver<WorkerOutcome>> {
        self.result_rx.take()
    }

    /// Waits up to `timeout` for workers to exit on their own (after their
    /// sentinels) and unregisters those that did. Returns the number still
    /// registered.
    pub fn join_all(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            self.reap_finished();
            if self.workers.is_empty() || Instant::now() >= deadline {
                return self.workers.len();
            }
            thread::sleep(Duration::from_millis(JOIN_POLL_INTERVAL_MS));
        }
    }

    /// Stops every worker.
    ///
    /// Sets the shutdown flag, closes both queues held by the pool and joins
    /// each worker within the grace period. Workers still busy inside the
    /// engine after that are detached and reported. Safe to call repeatedly.
    pub fn shutdown_all(&mut self) -> PoolStats {
        self.shutdown.store(true, Ordering::SeqCst);
        self.work_tx.take();
        self.result_rx.take();

        let remaining = self.join_all(self.shutdown_grace);
        if remaining > 0 {
            for (worker_id, _handle) in self.workers.drain() {
                warn!(
                    worker_id,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Worker did not exit within grace period; detaching"
                );
                self.stats.detached += 1;
            }
        }

        self.stats.live = self.live_workers();
        debug!(stats = ?self.stats, "Worker pool shut down");
        self.stats.clone()
    }

    fn reap_finished(&mut self) {
        let finished: Vec<usize> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for worker_id in finished {
            let Some(handle) = self.workers.remove(&worker_id) else {
                continue;
            };
            match handle.join() {
                Ok(exit) => self.stats.record(exit),
                Err(_) => {
                    warn!(worker_id, "Worker thread panicked");
                    self.stats.panicked += 1;
                }
            }
        }
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown_all();
        }
    }
}
