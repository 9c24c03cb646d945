//! src/engine/mod.rs
//!
//! Scoring engines and the model-type registry.
//!
//! An engine is loaded once from a checkpoint and then shared read-only by
//! every worker through an `Arc<dyn ScoringEngine>`. The registry maps the
//! checkpoint's `model_type` tag to a constructor; adding a model type means
//! adding one row to [`ENGINE_REGISTRY`].

pub mod checkpoint;
pub mod ngram;

pub use checkpoint::{Checkpoint, Parameter};
pub use ngram::{BigramEngine, UnigramEngine, Vocabulary};

use crate::error::{EvalError, Result};
use crate::sample::Sample;
use std::path::Path;
use std::sync::Arc;

/// Per-sample scoring output.
///
/// `log_probs` are natural log-probabilities (≤ 0), one per scored token;
/// `score` is their sum and `length` their count.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub score: f64,
    pub length: usize,
    pub log_probs: Vec<f64>,
}

impl Score {
    pub fn from_log_probs(log_probs: Vec<f64>) -> Self {
        Self {
            score: log_probs.iter().sum(),
            length: log_probs.len(),
            log_probs,
        }
    }
}

/// A read-only scoring model.
///
/// `evaluate` is called concurrently from several worker threads and must not
/// mutate shared state.
pub trait ScoringEngine: Send + Sync {
    /// Registry tag of this engine.
    fn model_type(&self) -> &str;

    fn evaluate(&self, sample: &Sample) -> anyhow::Result<Score>;
}

pub type EngineConstructor = fn(&Checkpoint) -> Result<Arc<dyn ScoringEngine>>;

fn build_unigram(checkpoint: &Checkpoint) -> Result<Arc<dyn ScoringEngine>> {
    Ok(Arc::new(UnigramEngine::from_checkpoint(checkpoint)?))
}

fn build_bigram(checkpoint: &Checkpoint) -> Result<Arc<dyn ScoringEngine>> {
    Ok(Arc::new(BigramEngine::from_checkpoint(checkpoint)?))
}

/// Model-type tag → constructor.
pub const ENGINE_REGISTRY: &[(&str, EngineConstructor)] = &[
    (UnigramEngine::MODEL_TYPE, build_unigram),
    (BigramEngine::MODEL_TYPE, build_bigram),
];

pub fn known_model_types() -> Vec<&'static str> {
    ENGINE_REGISTRY.iter().map(|(tag, _)| *tag).collect()
}

pub fn lookup(tag: &str) -> Result<EngineConstructor> {
    ENGINE_REGISTRY
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| EvalError::UnknownModelType {
            tag: tag.to_string(),
            known: known_model_types().join(", "),
        })
}

/// Builds the engine named by the checkpoint's `model_type`.
pub fn build_engine(checkpoint: &Checkpoint) -> Result<Arc<dyn ScoringEngine>> {
    let tag = checkpoint.model_type()?;
    let engine = lookup(tag)?(checkpoint)?;
    tracing::debug!(model_type = tag, "Scoring engine constructed");
    Ok(engine)
}

pub fn load_engine(path: impl AsRef<Path>) -> Result<Arc<dyn ScoringEngine>> {
    build_engine(&Checkpoint::load(path)?)
}
