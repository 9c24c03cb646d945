//! src/pipeline/collector.rs
//!
//! Reassembles worker results in corpus order.
//!
//! Results arrive in completion order. Each one is slotted into a
//! pre-sized [`ResultTable`] by its index, so the final table is in corpus
//! order no matter which worker finished first. A [`RunningAggregate`] is
//! updated per result and drives the periodic progress log.
//!
//! ```text
//!  result queue ──┐
//!                 ├──► select! ──► ResultTable[index] = item
//!  dispatch report┘        │       RunningAggregate += item
//!                          └─ poll timeout: live workers? deadline? interrupt?
//! ```

use super::config::{FailurePolicy, PipelineConfig};
use super::dispatcher::DispatchReport;
use super::messages::{ItemFailure, ResultItem, WorkerOutcome};
use super::pool::PoolManager;
use crate::error::{EvalError, Result};
use crossbeam_channel::{never, select, Receiver};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Corpus-level totals for perplexity.
///
/// Sign convention: `total_log_prob` is a sum of natural log-probabilities
/// (≤ 0) and perplexity is `exp(-total_log_prob / total_length)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAggregate {
    pub total_length: usize,
    pub total_log_prob: f64,
}

impl RunningAggregate {
    pub fn add(&mut self, item_length: usize, log_prob: f64) {
        self.total_length += item_length;
        self.total_log_prob += log_prob;
    }

    pub fn add_item(&mut self, item: &ResultItem) {
        self.add(item.item_length, item.total_log_prob());
    }

    /// `None` while no tokens have been counted.
    pub fn perplexity(&self) -> Option<f64> {
        if self.total_length == 0 {
            return None;
        }
        Some((-self.total_log_prob / self.total_length as f64).exp())
    }
}

/// Index-addressed result storage, one slot per sample.
#[derive(Debug, Clone)]
pub struct ResultTable {
    slots: Vec<Option<ResultItem>>,
    skipped: BTreeMap<usize, ItemFailure>,
    filled: usize,
}

impl ResultTable {
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            skipped: BTreeMap::new(),
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Samples accounted for, scored or skipped.
    pub fn received(&self) -> usize {
        self.filled + self.skipped.len()
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.len()
    }

    pub fn get(&self, index: usize) -> Option<&ResultItem> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    fn check_vacant(&self, index: usize) -> Result<()> {
        match self.slots.get(index) {
            None => Err(EvalError::IndexOutOfRange {
                index,
                len: self.len(),
            }),
            Some(Some(_)) => Err(EvalError::DuplicateResult { index }),
            Some(None) if self.skipped.contains_key(&index) => {
                Err(EvalError::DuplicateResult { index })
            }
            Some(None) => Ok(()),
        }
    }

    /// Stores a result in its slot. Overwrites and out-of-range indices are errors.
    pub fn insert(&mut self, item: ResultItem) -> Result<&ResultItem> {
        let index = item.index;
        self.check_vacant(index)?;
        self.filled += 1;
        Ok(&*self.slots[index].insert(item))
    }

    /// Marks a sample as skipped after a worker failure.
    pub fn skip(&mut self, failure: ItemFailure) -> Result<()> {
        self.check_vacant(failure.index)?;
        self.skipped.insert(failure.index, failure);
        Ok(())
    }

    /// Lowest index with neither a result nor a recorded skip.
    pub fn first_missing(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .find(|(i, slot)| slot.is_none() && !self.skipped.contains_key(i))
            .map(|(i, _)| i)
    }

    /// Totals folded in index order, so the result does not depend on the
    /// order in which workers finished.
    pub fn aggregate(&self) -> RunningAggregate {
        let mut aggregate = RunningAggregate::default();
        for item in self.slots.iter().flatten() {
            aggregate.add_item(item);
        }
        aggregate
    }

    /// Splits a complete table into ordered results and skipped failures.
    pub fn into_parts(self) -> Result<(Vec<ResultItem>, Vec<ItemFailure>)> {
        let missing: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, slot)| slot.is_none() && !self.skipped.contains_key(i))
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(EvalError::MissingResults(missing));
        }
        let results = self.slots.into_iter().flatten().collect();
        let skipped = self.skipped.into_values().collect();
        Ok((results, skipped))
    }
}

/// Drains the result queue until every sample is accounted for.
pub(crate) struct Collector {
    table: ResultTable,
    running: RunningAggregate,
    policy: FailurePolicy,
    progress_interval: usize,
    result_timeout: Duration,
    last_checkpoint: Instant,
}

impl Collector {
    pub(crate) fn new(expected: usize, config: &PipelineConfig) -> Self {
        Self {
            table: ResultTable::with_len(expected),
            running: RunningAggregate::default(),
            policy: config.failure_policy,
            progress_interval: config.progress_interval,
            result_timeout: config.result_timeout,
            last_checkpoint: Instant::now(),
        }
    }

    pub(crate) fn collect(
        mut self,
        results: Receiver<WorkerOutcome>,
        reports: Receiver<DispatchReport>,
        pool: &PoolManager,
    ) -> Result<ResultTable> {
        let expected = self.table.len();
        let idle = never();
        let mut reported = false;
        let mut last_result = Instant::now();
        self.last_checkpoint = Instant::now();

        while !self.table.is_complete() {
            if pool.is_shutdown() {
                return Err(self.interrupted());
            }
            let report_rx = if reported { idle.clone() } else { reports.clone() };

            select! {
                recv(results) -> message => match message {
                    Ok(outcome) => {
                        self.accept(outcome)?;
                        last_result = Instant::now();
                    }
                    Err(_) if pool.is_shutdown() => return Err(self.interrupted()),
                    Err(_) => return Err(self.exhausted(pool, &reports)),
                },
                recv(report_rx) -> report => {
                    reported = true;
                    match report {
                        Ok(Ok(dispatched)) => debug!(dispatched, "Dispatcher finished"),
                        Ok(Err(_)) if pool.is_shutdown() => return Err(self.interrupted()),
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Err(EvalError::DispatcherLost),
                    }
                },
                default(pool.poll_interval()) => {
                    if pool.is_shutdown() {
                        return Err(self.interrupted());
                    }
                    // Workers decrement the live count only after their last
                    // send, so an empty queue here means nothing more is coming.
                    if pool.live_workers() == 0 && results.is_empty() {
                        return Err(self.exhausted(pool, &reports));
                    }
                    if last_result.elapsed() >= self.result_timeout {
                        return Err(EvalError::Timeout {
                            waited: self.result_timeout,
                            received: self.table.received(),
                            expected,
                            first_missing: self.table.first_missing().unwrap_or(expected),
                        });
                    }
                },
            }
        }

        Ok(self.table)
    }

    fn accept(&mut self, outcome: WorkerOutcome) -> Result<()> {
        match outcome {
            Ok(item) => {
                let item = self.table.insert(item)?;
                self.running.add_item(item);
            }
            Err(failure) => match self.policy {
                FailurePolicy::FailFast => return Err(failure.into()),
                FailurePolicy::Skip => {
                    warn!(
                        index = failure.index,
                        worker_id = failure.worker_id,
                        error = %failure.message,
                        "Skipping sample the engine could not score"
                    );
                    self.table.skip(failure)?;
                }
            },
        }

        let received = self.table.received();
        if received % self.progress_interval == 0 {
            let elapsed = self.last_checkpoint.elapsed();
            self.last_checkpoint = Instant::now();
            info!(
                received,
                expected = self.table.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                perplexity = self.running.perplexity().unwrap_or(f64::NAN),
                "Scored {}/{} samples",
                received,
                self.table.len()
            );
        }
        Ok(())
    }

    fn interrupted(&self) -> EvalError {
        EvalError::Interrupted {
            received: self.table.received(),
            expected: self.table.len(),
        }
    }

    /// Workers are gone. A dispatcher error explains why, so it wins.
    fn exhausted(&self, pool: &PoolManager, reports: &Receiver<DispatchReport>) -> EvalError {
        if let Ok(Err(e)) = reports.try_recv() {
            return e;
        }
        EvalError::PoolExhausted {
            live: pool.live_workers(),
            received: self.table.received(),
            expected: self.table.len(),
        }
    }
}
