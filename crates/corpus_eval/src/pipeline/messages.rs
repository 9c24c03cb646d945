//! src/pipeline/messages.rs
//!
//! Messages exchanged over the work and result queues.

use crate::engine::Score;
use crate::error::EvalError;
use crate::sample::Sample;

/// A sample tagged with its position in the corpus.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub index: usize,
    pub sample: Sample,
}

/// Element of the work queue.
#[derive(Debug)]
pub enum WorkMessage {
    Item(WorkItem),
    /// No more work; the receiving worker exits. One is sent per worker.
    Sentinel,
}

/// Scoring output for one sample. `index` is the only link back to the
/// originating [`WorkItem`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem {
    pub index: usize,
    /// Sentence total log-probability.
    pub score: f64,
    pub item_length: usize,
    pub log_probs: Vec<f64>,
}

impl ResultItem {
    pub fn from_score(index: usize, score: Score) -> Self {
        Self {
            index,
            score: score.score,
            item_length: score.length,
            log_probs: score.log_probs,
        }
    }

    /// Log-probability mass this item contributes to the corpus total.
    pub fn total_log_prob(&self) -> f64 {
        self.log_probs.iter().sum()
    }
}

/// A sample the engine could not score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub worker_id: usize,
    pub message: String,
}

impl From<ItemFailure> for EvalError {
    fn from(failure: ItemFailure) -> Self {
        EvalError::WorkerComputation {
            index: failure.index,
            worker_id: failure.worker_id,
            message: failure.message,
        }
    }
}

/// Element of the result queue.
pub type WorkerOutcome = Result<ResultItem, ItemFailure>;
