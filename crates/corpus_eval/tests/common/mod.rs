#![allow(dead_code)]

use corpus_eval::corpus::{Corpus, InMemoryCorpus, SampleStream};
use corpus_eval::engine::{Score, ScoringEngine};
use corpus_eval::pipeline::{current_worker_id, PipelineConfig};
use corpus_eval::Sample;

use anyhow::{anyhow, bail, Result};
use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Corpus of `n` samples whose references are `s0`, `s1`, ...
pub fn indexed_corpus(n: usize) -> InMemoryCorpus {
    InMemoryCorpus::new(
        (0..n)
            .map(|i| Sample::reference_only(format!("s{i}")))
            .collect(),
    )
}

/// Recovers the corpus index from an `indexed_corpus` sample.
pub fn sample_index(sample: &Sample) -> Result<usize> {
    sample
        .reference
        .strip_prefix('s')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| anyhow!("not an indexed sample: {:?}", sample.reference))
}

/// Deterministic per-index score used by the mock engines.
pub fn expected_log_prob(index: usize) -> f64 {
    -((index % 7) as f64 + 1.0) * 0.25
}

pub fn expected_length(index: usize) -> usize {
    index % 3 + 1
}

/// Perplexity computed directly from the per-index formulas, in index order.
pub fn expected_perplexity(n: usize) -> Option<f64> {
    let total_len: usize = (0..n).map(expected_length).sum();
    if total_len == 0 {
        return None;
    }
    let total_lp: f64 = (0..n).map(expected_log_prob).sum();
    Some((-total_lp / total_len as f64).exp())
}

fn indexed_score(index: usize) -> Score {
    Score {
        score: expected_log_prob(index),
        length: expected_length(index),
        log_probs: vec![expected_log_prob(index)],
    }
}

pub fn test_config(workers: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .num_workers(workers)
        .queue_capacity(8)
        .result_capacity(8)
        .worker_poll_interval(Duration::from_millis(10))
        .result_timeout(Duration::from_secs(30))
        .progress_interval(25)
        .build()
}

/// Scores `s{i}` with [`expected_log_prob`] and [`expected_length`].
pub struct IndexedEngine;

impl ScoringEngine for IndexedEngine {
    fn model_type(&self) -> &str {
        "indexed"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        Ok(indexed_score(sample_index(sample)?))
    }
}

/// Fixed `(log_prob, length)` per index.
pub struct TableEngine {
    pub entries: Vec<(f64, usize)>,
}

impl ScoringEngine for TableEngine {
    fn model_type(&self) -> &str {
        "table"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        let (log_prob, length) = self
            .entries
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("no entry for sample {index}"))?;
        Ok(Score {
            score: log_prob,
            length,
            log_probs: vec![log_prob],
        })
    }
}

/// Sleeps `delays_ms[index]` before scoring, so completion order differs
/// from corpus order.
pub struct DelayedEngine {
    pub delays_ms: Vec<u64>,
}

impl ScoringEngine for DelayedEngine {
    fn model_type(&self) -> &str {
        "delayed"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        let delay = self.delays_ms.get(index).copied().unwrap_or(0);
        thread::sleep(Duration::from_millis(delay));
        Ok(indexed_score(index))
    }
}

/// Returns an error for one index.
pub struct FailingEngine {
    pub fail_on: usize,
}

impl ScoringEngine for FailingEngine {
    fn model_type(&self) -> &str {
        "failing"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        if index == self.fail_on {
            bail!("cannot score sample {index}");
        }
        Ok(indexed_score(index))
    }
}

/// Panics on one index.
pub struct PanickingEngine {
    pub panic_on: usize,
}

impl ScoringEngine for PanickingEngine {
    fn model_type(&self) -> &str {
        "panicking"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        if index == self.panic_on {
            panic!("model state corrupted at sample {index}");
        }
        Ok(indexed_score(index))
    }
}

/// Blocks for a long time on one index.
pub struct HangingEngine {
    pub hang_on: usize,
    pub hang_for: Duration,
}

impl ScoringEngine for HangingEngine {
    fn model_type(&self) -> &str {
        "hanging"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        if index == self.hang_on {
            thread::sleep(self.hang_for);
        }
        Ok(indexed_score(index))
    }
}

/// Records which worker scored each sample.
pub struct RecordingEngine {
    pub delay: Duration,
    pub workers_seen: Mutex<HashSet<usize>>,
}

impl RecordingEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            workers_seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn workers_seen(&self) -> HashSet<usize> {
        self.workers_seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl ScoringEngine for RecordingEngine {
    fn model_type(&self) -> &str {
        "recording"
    }

    fn evaluate(&self, sample: &Sample) -> Result<Score> {
        let index = sample_index(sample)?;
        thread::sleep(self.delay);
        let worker = current_worker_id().ok_or_else(|| anyhow!("not on a worker thread"))?;
        self.workers_seen
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .insert(worker);
        Ok(indexed_score(index))
    }
}

/// Streaming corpus that does not know its length up front.
pub struct StreamingCorpus {
    pub n: usize,
}

impl Corpus for StreamingCorpus {
    fn stream(&self) -> Result<SampleStream> {
        Ok(Box::new(
            (0..self.n).map(|i| Ok(Sample::reference_only(format!("s{i}")))),
        ))
    }
}

/// Corpus whose length hint disagrees with what it streams.
pub struct MisreportingCorpus {
    pub declared: usize,
    pub actual: usize,
}

impl Corpus for MisreportingCorpus {
    fn stream(&self) -> Result<SampleStream> {
        Ok(Box::new(
            (0..self.actual).map(|i| Ok(Sample::reference_only(format!("s{i}")))),
        ))
    }

    fn len(&self) -> Option<usize> {
        Some(self.declared)
    }
}

/// Unknown-length corpus that takes `delay` to produce each sample.
pub struct SlowStreamingCorpus {
    pub n: usize,
    pub delay: Duration,
}

impl Corpus for SlowStreamingCorpus {
    fn stream(&self) -> Result<SampleStream> {
        let delay = self.delay;
        Ok(Box::new((0..self.n).map(move |i| {
            thread::sleep(delay);
            Ok(Sample::reference_only(format!("s{i}")))
        })))
    }
}
