//! src/pipeline/mod.rs
//!
//! Parallel corpus scoring.
//!
//! The pipeline scores every sample of a corpus on a fixed pool of worker
//! threads that share one read-only scoring engine, then reassembles the
//! results in corpus order and computes corpus perplexity.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌────────┐  samples   ┌────────────┐  WorkMessage   ┌──────────────┐
//!   │ Corpus │ ─────────► │ Dispatcher │ ─────────────► │  work queue  │ (bounded)
//!   └────────┘            └─────┬──────┘  Item | Sentinel└──────┬───────┘
//!                               │ report                        │
//!                               │                  ┌────────────┼────────────┐
//!                               │                  ↓            ↓            ↓
//!                               │             [worker 0]   [worker 1]   [worker P-1]
//!                               │                  │  Arc<dyn ScoringEngine> │
//!                               │                  └────────────┼────────────┘
//!                               │                               ↓ WorkerOutcome
//!                               │                        ┌──────────────┐
//!                               └──────────────────────► │ result queue │ (bounded)
//!                                                        └──────┬───────┘
//!                                                               ↓
//!                                                        ┌─────────────┐
//!                                                        │  Collector  │ → ResultTable
//!                                                        └─────────────┘   (corpus order)
//! ```
//!
//! Lifecycle: `INIT → DISPATCHING → COLLECTING → DONE`, with dispatching and
//! collecting overlapping. Any error is terminal; the pool is shut down and
//! the run must be restarted from scratch.
//!
//! # Module Structure
//!
//! ```text
//! src/pipeline/
//! ├── mod.rs          # run/evaluate entry points and EvalReport
//! ├── config.rs       # PipelineConfig, builder, validation, FailurePolicy
//! ├── messages.rs     # WorkItem, WorkMessage, ResultItem, ItemFailure
//! ├── dispatcher.rs   # corpus → work queue, then sentinels
//! ├── worker.rs       # worker loop, per-item error and panic capture
//! ├── pool.rs         # PoolManager, ShutdownHandle, PoolStats
//! ├── collector.rs    # ResultTable, RunningAggregate, progress, deadlines
//! └── thread.rs       # thread-local worker id
//! ```

pub mod collector;
pub mod config;
mod dispatcher;
pub mod messages;
pub mod pool;
pub mod thread;
mod worker;

pub use collector::{ResultTable, RunningAggregate};
pub use config::{auto_worker_count, FailurePolicy, PipelineConfig, PipelineConfigBuilder};
pub use messages::{ItemFailure, ResultItem, WorkItem, WorkMessage, WorkerOutcome};
pub use pool::{PoolManager, PoolStats, ShutdownHandle};
pub use thread::{current_worker_id, WORKER_ID};
pub use worker::WorkerExit;

use crate::corpus::{Corpus, SampleStream};
use crate::engine::ScoringEngine;
use crate::error::{EvalError, Result};
use collector::Collector;
use crossbeam_channel::bounded;
use dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct EvalReport {
    /// Scored samples in corpus order.
    pub results: Vec<ResultItem>,
    /// Samples left out under [`FailurePolicy::Skip`], in index order.
    pub skipped: Vec<ItemFailure>,
    pub aggregate: RunningAggregate,
    pub pool: PoolStats,
    pub elapsed: Duration,
}

impl EvalReport {
    pub fn perplexity(&self) -> Option<f64> {
        self.aggregate.perplexity()
    }

    /// Samples in the corpus, scored or skipped.
    pub fn num_samples(&self) -> usize {
        self.results.len() + self.skipped.len()
    }
}

/// Opens the corpus and determines its length, enumerating it in full when
/// the corpus cannot say up front. Enumeration stops early on shutdown.
fn open_corpus(corpus: &dyn Corpus, shutdown: &ShutdownHandle) -> Result<(SampleStream, usize)> {
    let open_err = |e: anyhow::Error| EvalError::Corpus {
        index: 0,
        message: format!("{e:#}"),
    };
    if let Some(len) = corpus.len() {
        return Ok((corpus.stream().map_err(open_err)?, len));
    }

    debug!("Corpus length unknown; enumerating before dispatch");
    let mut samples = Vec::new();
    for (index, sample) in corpus.stream().map_err(open_err)?.enumerate() {
        if shutdown.is_shutdown() {
            return Err(EvalError::Interrupted {
                received: 0,
                expected: index,
            });
        }
        samples.push(sample.map_err(|e| EvalError::Corpus {
            index,
            message: format!("{e:#}"),
        })?);
    }
    let len = samples.len();
    Ok((Box::new(samples.into_iter().map(Ok)), len))
}

/// Runs one evaluation on an already spawned pool.
///
/// The pool is single-use: it is shut down before this returns, on success
/// and on error. Obtain a [`ShutdownHandle`] from the pool before calling
/// this to be able to interrupt the run.
pub fn run(mut pool: PoolManager, corpus: &dyn Corpus, config: &PipelineConfig) -> Result<EvalReport> {
    let started = Instant::now();
    let span = info_span!("evaluate", workers = pool.num_workers());
    let _enter = span.enter();

    let (Some(work_tx), Some(results)) = (pool.take_work_sender(), pool.take_result_receiver())
    else {
        return Err(EvalError::Config(
            "worker pool has already been used for a run".into(),
        ));
    };

    let (samples, expected) = match open_corpus(corpus, &pool.shutdown_handle()) {
        Ok(opened) => opened,
        Err(e) => {
            pool.shutdown_all();
            return Err(e);
        }
    };
    info!(samples = expected, workers = pool.num_workers(), "Dispatching corpus");

    let (report_tx, report_rx) = bounded(1);
    let dispatcher = Dispatcher::new(
        work_tx,
        pool.num_workers(),
        pool.shutdown_handle(),
        pool.poll_interval(),
    )
    .spawn(samples, expected, report_tx)?;

    let collected = Collector::new(expected, config).collect(results, report_rx.clone(), &pool);

    let table = match collected {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "Evaluation failed; stopping workers");
            pool.shutdown_all();
            if dispatcher.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
            return Err(e);
        }
    };

    if dispatcher.join().is_err() {
        warn!("Dispatcher thread panicked");
    }
    // The table can fill before the dispatcher notices a corpus longer
    // than it declared.
    if let Ok(Err(e)) = report_rx.try_recv() {
        pool.shutdown_all();
        return Err(e);
    }
    let still_running = pool.join_all(config.shutdown_grace);
    if still_running > 0 {
        debug!(still_running, "Workers still running after sentinels");
    }
    let stats = pool.shutdown_all();

    let aggregate = table.aggregate();
    let (results, skipped) = table.into_parts()?;
    let report = EvalReport {
        results,
        skipped,
        aggregate,
        pool: stats,
        elapsed: started.elapsed(),
    };

    match report.perplexity() {
        Some(ppl) => info!(
            samples = report.num_samples(),
            skipped = report.skipped.len(),
            tokens = aggregate.total_length,
            perplexity = ppl,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Evaluation complete"
        ),
        None => info!(
            samples = report.num_samples(),
            "Evaluation complete; no tokens scored, perplexity undefined"
        ),
    }
    Ok(report)
}

/// Spawns a pool for `engine` and runs one evaluation of `corpus`.
pub fn evaluate(
    engine: Arc<dyn ScoringEngine>,
    corpus: &dyn Corpus,
    config: &PipelineConfig,
) -> Result<EvalReport> {
    let pool = PoolManager::spawn(engine, config)?;
    run(pool, corpus, config)
}
