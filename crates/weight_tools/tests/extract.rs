//! File-level extraction.

use corpus_eval::engine::checkpoint::{MODEL_TYPE_KEY, VALIDATION_KEY, VOCAB_KEY};
use corpus_eval::engine::{load_engine, Checkpoint, Parameter, UnigramEngine};
use corpus_eval::EvalError;
use weight_tools::{extract_file, ExtractMode, EXTRACTED_FROM_KEY};

use anyhow::Result;
use safetensors::SafeTensors;
use std::path::Path;
use tempfile::tempdir;

fn write_source(path: &Path) -> Result<()> {
    Checkpoint::new()
        .with_metadata(MODEL_TYPE_KEY, "unigram")
        .with_metadata(VOCAB_KEY, r#"["<unk>", "</s>", "a"]"#)
        .with_metadata(VALIDATION_KEY, r#"[{"reference": "a"}]"#)
        .with_parameter(
            UnigramEngine::LOGITS_KEY,
            Parameter::from_f32(vec![3], &[0.0, 0.5, 1.0]),
        )
        .with_parameter("optimizer.momentum", Parameter::from_f32(vec![3], &[0.1, 0.2, 0.3]))
        .save(path)?;
    Ok(())
}

#[test]
fn test_bare_extract_writes_only_tensors() -> Result<()> {
    let dir = tempdir()?;
    let (source, output) = (dir.path().join("full.safetensors"), dir.path().join("out.safetensors"));
    write_source(&source)?;

    extract_file(&source, &["optimizer.momentum"], &output, ExtractMode::Bare)?;

    let bytes = std::fs::read(&output)?;
    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    assert!(header.metadata().is_none());
    let tensors = SafeTensors::deserialize(&bytes)?;
    assert_eq!(tensors.names(), vec!["optimizer.momentum"]);

    let loaded = Checkpoint::load(&output)?;
    assert_eq!(loaded.parameter("optimizer.momentum")?.to_f32()?, vec![0.1, 0.2, 0.3]);
    Ok(())
}

#[test]
fn test_wrapped_extract_loads_as_engine() -> Result<()> {
    let dir = tempdir()?;
    let (source, output) = (dir.path().join("full.safetensors"), dir.path().join("out.safetensors"));
    write_source(&source)?;

    extract_file(&source, &[UnigramEngine::LOGITS_KEY], &output, ExtractMode::Wrapped)?;

    let loaded = Checkpoint::load(&output)?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.model_type()?, "unigram");
    assert_eq!(
        loaded.metadata(EXTRACTED_FROM_KEY),
        Some(source.display().to_string().as_str())
    );
    // Only model metadata is carried over.
    assert!(loaded.validation_set()?.is_none());

    let engine = load_engine(&output)?;
    assert_eq!(engine.model_type(), "unigram");
    Ok(())
}

#[test]
fn test_missing_key_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let (source, output) = (dir.path().join("full.safetensors"), dir.path().join("out.safetensors"));
    write_source(&source)?;

    let result = extract_file(
        &source,
        &[UnigramEngine::LOGITS_KEY, "decoder.weight"],
        &output,
        ExtractMode::Bare,
    );
    match result {
        Err(EvalError::MissingParameter { key }) => assert_eq!(key, "decoder.weight"),
        other => panic!("expected MissingParameter, got {other:?}"),
    }
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_missing_source_is_reported() {
    let dir = tempdir().expect("temp dir");
    let result = extract_file(
        dir.path().join("absent.safetensors"),
        &["w"],
        dir.path().join("out.safetensors"),
        ExtractMode::Bare,
    );
    assert!(matches!(result, Err(EvalError::ModelNotFound(_))));
}
