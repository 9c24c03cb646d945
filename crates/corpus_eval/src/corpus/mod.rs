//! src/corpus/mod.rs
//!
//! Sources of samples fed to the evaluation pipeline.
//!
//! A `Corpus` is a finite, ordered, lazily produced sequence of samples.
//! Its position in the stream is the sample's identity: the dispatcher
//! numbers samples `0..N-1` in stream order.

pub mod text;

pub use text::{ParallelTextCorpus, TextLines};

use crate::sample::Sample;
use anyhow::Result;
use std::sync::Arc;

/// Boxed sample stream handed to the dispatcher thread.
pub type SampleStream = Box<dyn Iterator<Item = Result<Sample>> + Send>;

/// A finite, ordered source of samples.
///
/// Implementations must be `Send + Sync`; streaming happens on the
/// dispatcher thread.
pub trait Corpus: Send + Sync {
    /// Opens a fresh stream over every sample, in corpus order.
    fn stream(&self) -> Result<SampleStream>;

    /// Number of samples, when known without reading the corpus.
    ///
    /// Corpora returning `None` are enumerated once in full before
    /// dispatch so the result table can be sized.
    fn len(&self) -> Option<usize> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(false)
    }
}

/// Corpus held entirely in memory as `Arc<[Sample]>`.
///
/// Cloning only bumps the reference count.
#[derive(Debug, Clone)]
pub struct InMemoryCorpus {
    samples: Arc<[Sample]>,
}

impl InMemoryCorpus {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into(),
        }
    }
}

impl From<Vec<Sample>> for InMemoryCorpus {
    fn from(samples: Vec<Sample>) -> Self {
        Self::new(samples)
    }
}

impl Corpus for InMemoryCorpus {
    fn stream(&self) -> Result<SampleStream> {
        let samples = self.samples.clone();
        Ok(Box::new(
            (0..samples.len()).map(move |i| Ok(samples[i].clone())),
        ))
    }

    fn len(&self) -> Option<usize> {
        Some(self.samples.len())
    }
}
