//! Extracts a subset of parameters from a scoring checkpoint.
//!
//! Two output modes:
//! - [`ExtractMode::Bare`]: only the selected tensors, no metadata.
//! - [`ExtractMode::Wrapped`]: the selected tensors plus the source's
//!   `model_type` and `vocab` entries, so the result loads as a model
//!   checkpoint of its own.

use std::path::Path;

use corpus_eval::engine::checkpoint::{MODEL_TYPE_KEY, VOCAB_KEY};
use corpus_eval::engine::Checkpoint;
use corpus_eval::{EvalError, Result};
use tracing::{debug, info};

/// Metadata key recording the checkpoint a wrapped extract came from.
pub const EXTRACTED_FROM_KEY: &str = "extracted_from";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractMode {
    #[default]
    Bare,
    Wrapped,
}

/// Projects `keys` out of `source`.
///
/// Every key must exist in `source`. `origin` is stored under
/// [`EXTRACTED_FROM_KEY`] in wrapped mode.
pub fn extract<S: AsRef<str>>(
    source: &Checkpoint,
    keys: &[S],
    mode: ExtractMode,
    origin: &str,
) -> Result<Checkpoint> {
    if keys.is_empty() {
        return Err(EvalError::Config(
            "at least one parameter key is required".into(),
        ));
    }
    let projected = source.project(keys)?;

    match mode {
        ExtractMode::Bare => Ok(projected),
        ExtractMode::Wrapped => {
            let model_type = source.model_type()?;
            let vocab = source
                .metadata(VOCAB_KEY)
                .ok_or_else(|| EvalError::MissingParameter {
                    key: VOCAB_KEY.to_string(),
                })?;
            Ok(projected
                .with_metadata(MODEL_TYPE_KEY, model_type)
                .with_metadata(VOCAB_KEY, vocab)
                .with_metadata(EXTRACTED_FROM_KEY, origin))
        }
    }
}

/// Loads `input`, extracts `keys` and writes the result to `output`.
///
/// Nothing is written unless every key was found.
pub fn extract_file<S: AsRef<str>>(
    input: impl AsRef<Path>,
    keys: &[S],
    output: impl AsRef<Path>,
    mode: ExtractMode,
) -> Result<Checkpoint> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let source = Checkpoint::load(input)?;
    debug!(
        path = %input.display(),
        parameters = source.len(),
        "Loaded source checkpoint"
    );

    let extracted = extract(&source, keys, mode, &input.display().to_string())?;
    extracted.save(output)?;

    info!(
        output = %output.display(),
        parameters = extracted.len(),
        mode = ?mode,
        "Wrote extracted parameters"
    );
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_eval::engine::Parameter;

    fn source() -> Checkpoint {
        Checkpoint::new()
            .with_metadata(MODEL_TYPE_KEY, "unigram")
            .with_metadata(VOCAB_KEY, r#"["<unk>", "</s>"]"#)
            .with_parameter("unigram.logits", Parameter::from_f32(vec![2], &[0.0, 1.0]))
            .with_parameter("head.bias", Parameter::from_f32(vec![1], &[0.5]))
    }

    #[test]
    fn test_bare_extract_has_no_metadata() -> anyhow::Result<()> {
        let extracted = extract(&source(), &["head.bias"], ExtractMode::Bare, "src")?;
        assert_eq!(extracted.len(), 1);
        assert!(extracted.metadata_map().is_empty());
        Ok(())
    }

    #[test]
    fn test_wrapped_extract_carries_model_metadata() -> anyhow::Result<()> {
        let extracted = extract(&source(), &["unigram.logits"], ExtractMode::Wrapped, "src")?;
        assert_eq!(extracted.model_type()?, "unigram");
        assert_eq!(extracted.vocab()?, vec!["<unk>", "</s>"]);
        assert_eq!(extracted.metadata(EXTRACTED_FROM_KEY), Some("src"));
        Ok(())
    }

    #[test]
    fn test_missing_key_and_empty_keys_are_rejected() {
        assert!(matches!(
            extract(&source(), &["nope"], ExtractMode::Bare, "src"),
            Err(EvalError::MissingParameter { .. })
        ));
        let none: [&str; 0] = [];
        assert!(matches!(
            extract(&source(), &none, ExtractMode::Bare, "src"),
            Err(EvalError::Config(_))
        ));
    }

    #[test]
    fn test_wrapping_requires_model_type() {
        let untyped = Checkpoint::new()
            .with_parameter("w", Parameter::from_f32(vec![1], &[1.0]));
        assert!(extract(&untyped, &["w"], ExtractMode::Wrapped, "src").is_err());
    }
}
