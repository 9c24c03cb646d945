//! src/engine/ngram.rs
//!
//! Unigram and bigram language models over a fixed vocabulary.
//!
//! Both engines tokenize the reference on whitespace, append `</s>` and map
//! unknown tokens to `<unk>`. Logits are normalised with a log-softmax once
//! at load time, so scoring is a table lookup per token.

use super::checkpoint::Checkpoint;
use super::{Score, ScoringEngine};
use crate::error::{EvalError, Result};
use crate::sample::Sample;
use anyhow::bail;
use std::collections::HashMap;

pub const UNK: &str = "<unk>";
pub const EOS: &str = "</s>";
pub const BOS: &str = "<s>";

/// Token ↔ id mapping with the special tokens resolved.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, usize>,
    unk: usize,
    eos: usize,
    bos: Option<usize>,
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let ids: HashMap<String, usize> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        if ids.len() != tokens.len() {
            return Err(EvalError::Config("vocabulary contains duplicate tokens".into()));
        }
        let special = |token: &str| {
            ids.get(token).copied().ok_or_else(|| {
                EvalError::Config(format!("vocabulary has no '{token}' token"))
            })
        };
        let unk = special(UNK)?;
        let eos = special(EOS)?;
        let bos = ids.get(BOS).copied();
        Ok(Self {
            tokens,
            ids,
            unk,
            eos,
            bos,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, id: usize) -> &str {
        &self.tokens[id]
    }

    pub fn id(&self, token: &str) -> usize {
        self.ids.get(token).copied().unwrap_or(self.unk)
    }

    /// Whitespace tokenization plus the end-of-sentence marker.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.split_whitespace()
            .map(|t| self.id(t))
            .chain(std::iter::once(self.eos))
            .collect()
    }
}

fn log_softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let log_sum = logits
        .iter()
        .map(|&x| (x as f64 - max).exp())
        .sum::<f64>()
        .ln();
    logits.iter().map(|&x| x as f64 - max - log_sum).collect()
}

fn check_shape(key: &str, shape: &[usize], expected: &[usize]) -> Result<()> {
    if shape != expected {
        return Err(EvalError::Config(format!(
            "parameter '{key}' has shape {shape:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

fn finite_or_bail(vocab: &Vocabulary, ids: &[usize], log_probs: Vec<f64>) -> anyhow::Result<Score> {
    if let Some(pos) = log_probs.iter().position(|lp| !lp.is_finite()) {
        bail!(
            "non-finite log-probability for token '{}' at position {}",
            vocab.token(ids[pos]),
            pos
        );
    }
    Ok(Score::from_log_probs(log_probs))
}

/// Context-free model: `log p(token)`.
#[derive(Debug, Clone)]
pub struct UnigramEngine {
    vocab: Vocabulary,
    log_probs: Vec<f64>,
}

impl UnigramEngine {
    pub const MODEL_TYPE: &'static str = "unigram";
    pub const LOGITS_KEY: &'static str = "unigram.logits";

    pub fn new(vocab: Vocabulary, logits: &[f32]) -> Result<Self> {
        check_shape(Self::LOGITS_KEY, &[logits.len()], &[vocab.len()])?;
        Ok(Self {
            log_probs: log_softmax(logits),
            vocab,
        })
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let vocab = Vocabulary::new(checkpoint.vocab()?)?;
        let param = checkpoint.parameter(Self::LOGITS_KEY)?;
        check_shape(Self::LOGITS_KEY, &param.shape, &[vocab.len()])?;
        Self::new(vocab, &param.to_f32()?)
    }
}

impl ScoringEngine for UnigramEngine {
    fn model_type(&self) -> &str {
        Self::MODEL_TYPE
    }

    fn evaluate(&self, sample: &Sample) -> anyhow::Result<Score> {
        let ids = self.vocab.encode(&sample.reference);
        let log_probs = ids.iter().map(|&id| self.log_probs[id]).collect();
        finite_or_bail(&self.vocab, &ids, log_probs)
    }
}

/// First-order model: `log p(token | previous token)`, starting from `<s>`.
///
/// Rows of the `[V, V]` logits matrix are indexed by the previous token.
#[derive(Debug, Clone)]
pub struct BigramEngine {
    vocab: Vocabulary,
    bos: usize,
    log_probs: Vec<f64>,
}

impl BigramEngine {
    pub const MODEL_TYPE: &'static str = "bigram";
    pub const LOGITS_KEY: &'static str = "bigram.logits";

    pub fn new(vocab: Vocabulary, logits: &[f32]) -> Result<Self> {
        let v = vocab.len();
        let bos = vocab
            .bos
            .ok_or_else(|| EvalError::Config(format!("bigram vocabulary has no '{BOS}' token")))?;
        check_shape(Self::LOGITS_KEY, &[logits.len()], &[v * v])?;
        let log_probs = logits.chunks_exact(v).flat_map(log_softmax).collect();
        Ok(Self {
            vocab,
            bos,
            log_probs,
        })
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let vocab = Vocabulary::new(checkpoint.vocab()?)?;
        let param = checkpoint.parameter(Self::LOGITS_KEY)?;
        check_shape(Self::LOGITS_KEY, &param.shape, &[vocab.len(), vocab.len()])?;
        Self::new(vocab, &param.to_f32()?)
    }
}

impl ScoringEngine for BigramEngine {
    fn model_type(&self) -> &str {
        Self::MODEL_TYPE
    }

    fn evaluate(&self, sample: &Sample) -> anyhow::Result<Score> {
        let v = self.vocab.len();
        let ids = self.vocab.encode(&sample.reference);
        let mut prev = self.bos;
        let log_probs = ids
            .iter()
            .map(|&id| {
                let lp = self.log_probs[prev * v + id];
                prev = id;
                lp
            })
            .collect();
        finite_or_bail(&self.vocab, &ids, log_probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkpoint::{Parameter, MODEL_TYPE_KEY, VOCAB_KEY};
    use crate::engine::build_engine;

    fn vocab(tokens: &[&str]) -> Result<Vocabulary> {
        Vocabulary::new(tokens.iter().map(|t| t.to_string()).collect())
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_vocabulary_requires_special_tokens() {
        assert!(vocab(&["a", "</s>"]).is_err());
        assert!(vocab(&["<unk>", "a"]).is_err());
        assert!(vocab(&["<unk>", "</s>", "a", "a"]).is_err());
    }

    #[test]
    fn test_encode_maps_unknown_and_appends_eos() -> anyhow::Result<()> {
        let v = vocab(&["<unk>", "</s>", "a", "b"])?;
        assert_eq!(v.encode("a  zzz b"), vec![2, 0, 3, 1]);
        assert_eq!(v.encode(""), vec![1]);
        Ok(())
    }

    #[test]
    fn test_uniform_unigram_scores_log_one_over_v() -> anyhow::Result<()> {
        let engine = UnigramEngine::new(vocab(&["<unk>", "</s>", "a", "b"])?, &[0.0; 4])?;
        let score = engine.evaluate(&Sample::reference_only("a b"))?;
        assert_eq!(score.length, 3);
        for lp in &score.log_probs {
            assert_close(*lp, (0.25f64).ln());
        }
        assert_close(score.score, 3.0 * (0.25f64).ln());
        Ok(())
    }

    #[test]
    fn test_unigram_rejects_wrong_logit_count() -> anyhow::Result<()> {
        assert!(UnigramEngine::new(vocab(&["<unk>", "</s>"])?, &[0.0; 3]).is_err());
        Ok(())
    }

    #[test]
    fn test_bigram_conditions_on_previous_token() -> anyhow::Result<()> {
        // Vocabulary: <unk> </s> <s> a
        let v = vocab(&["<unk>", "</s>", "<s>", "a"])?;
        let big = 20.0f32;
        let mut logits = vec![0.0f32; 16];
        logits[2 * 4 + 3] = big; // <s> -> a almost certain
        logits[3 * 4 + 1] = big; // a -> </s> almost certain
        let engine = BigramEngine::new(v, &logits)?;

        let likely = engine.evaluate(&Sample::reference_only("a"))?;
        assert_eq!(likely.length, 2);
        assert!(likely.score > -1e-3, "score {}", likely.score);

        let unlikely = engine.evaluate(&Sample::reference_only("a a"))?;
        assert!(unlikely.score < -10.0);
        Ok(())
    }

    #[test]
    fn test_bigram_requires_bos() -> anyhow::Result<()> {
        assert!(BigramEngine::new(vocab(&["<unk>", "</s>"])?, &[0.0; 4]).is_err());
        Ok(())
    }

    #[test]
    fn test_negative_infinity_logit_is_an_engine_error() -> anyhow::Result<()> {
        let engine = UnigramEngine::new(
            vocab(&["<unk>", "</s>", "a"])?,
            &[0.0, 0.0, f32::NEG_INFINITY],
        )?;
        assert!(engine.evaluate(&Sample::reference_only("")).is_ok());
        let err = engine
            .evaluate(&Sample::reference_only("a"))
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("'a' at position 0"), "unexpected: {err}");
        Ok(())
    }

    #[test]
    fn test_engines_build_from_checkpoint_through_registry() -> anyhow::Result<()> {
        let checkpoint = Checkpoint::new()
            .with_metadata(MODEL_TYPE_KEY, "bigram")
            .with_metadata(VOCAB_KEY, r#"["<unk>", "</s>", "<s>"]"#)
            .with_parameter(BigramEngine::LOGITS_KEY, Parameter::from_f32(vec![3, 3], &[0.0; 9]));
        let engine = build_engine(&checkpoint)?;
        assert_eq!(engine.model_type(), "bigram");
        let score = engine.evaluate(&Sample::reference_only("x"))?;
        assert_close(score.score, 2.0 * (1.0f64 / 3.0).ln());

        let wrong_shape = checkpoint.with_parameter(
            BigramEngine::LOGITS_KEY,
            Parameter::from_f32(vec![9], &[0.0; 9]),
        );
        assert!(build_engine(&wrong_shape).is_err());
        Ok(())
    }
}
