//! Error types for corpus evaluation.
//!
//! Variants fall into three families:
//! - configuration problems, reported before any worker is spawned
//! - per-sample computation failures forwarded by workers
//! - pool failures (exhaustion, timeouts, interrupts, bookkeeping errors)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for the evaluation pipeline.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Model checkpoint not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Checkpoint is missing parameter '{key}'")]
    MissingParameter { key: String },

    #[error("Unknown model type '{tag}' (known types: {known})")]
    UnknownModelType { tag: String, known: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] safetensors::SafeTensorError),

    #[error("Worker {worker_id} failed on sample {index}: {message}")]
    WorkerComputation {
        index: usize,
        worker_id: usize,
        message: String,
    },

    #[error(
        "Worker pool exhausted with {received}/{expected} results collected ({live} workers alive)"
    )]
    PoolExhausted {
        live: usize,
        received: usize,
        expected: usize,
    },

    #[error(
        "No result within {waited:?}; {received}/{expected} collected, first missing sample is {first_missing}"
    )]
    Timeout {
        waited: Duration,
        received: usize,
        expected: usize,
        first_missing: usize,
    },

    #[error("Evaluation interrupted after {received}/{expected} results")]
    Interrupted { received: usize, expected: usize },

    #[error("Failed to read sample {index} from corpus: {message}")]
    Corpus { index: usize, message: String },

    #[error("Corpus declared {declared} samples but yielded {actual}")]
    CorpusLengthMismatch { declared: usize, actual: usize },

    #[error("Result for sample {index} received twice")]
    DuplicateResult { index: usize },

    #[error("Result index {index} is out of range for a corpus of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Collection finished with {} empty result slots (first: {})", .0.len(), .0.first().copied().unwrap_or_default())]
    MissingResults(Vec<usize>),

    #[error("Dispatcher stopped without reporting how many samples it sent")]
    DispatcherLost,

    #[error("Failed to spawn {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// True for errors raised before any work was dispatched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ModelNotFound(_)
                | Self::MissingParameter { .. }
                | Self::UnknownModelType { .. }
                | Self::Checkpoint(_)
        )
    }

    /// Sample index this error refers to, if any.
    pub fn sample_index(&self) -> Option<usize> {
        match self {
            Self::WorkerComputation { index, .. }
            | Self::Corpus { index, .. }
            | Self::DuplicateResult { index }
            | Self::IndexOutOfRange { index, .. } => Some(*index),
            Self::Timeout { first_missing, .. } => Some(*first_missing),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, EvalError>;
