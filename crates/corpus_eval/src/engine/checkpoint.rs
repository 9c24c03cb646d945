//! src/engine/checkpoint.rs
//!
//! Model checkpoints stored as safetensors files.
//!
//! Layout:
//! - `__metadata__.model_type`: registry tag selecting the engine
//! - `__metadata__.vocab`: JSON array of token strings
//! - `__metadata__.validation` (optional): JSON array of `{source, reference}`
//! - one tensor per named parameter

use crate::error::{EvalError, Result};
use crate::sample::Sample;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const MODEL_TYPE_KEY: &str = "model_type";
pub const VOCAB_KEY: &str = "vocab";
pub const VALIDATION_KEY: &str = "validation";

/// One named tensor, owned.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl Parameter {
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            dtype: Dtype::F32,
            shape,
            data: bytemuck::cast_slice::<f32, u8>(values).to_vec(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decodes an F32 tensor into host floats.
    ///
    /// Buffers read from disk carry no alignment guarantee, so elements are
    /// read unaligned.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        if self.dtype != Dtype::F32 {
            return Err(EvalError::Config(format!(
                "expected an F32 tensor, found {:?} with shape {:?}",
                self.dtype, self.shape
            )));
        }
        let expected = self.numel() * std::mem::size_of::<f32>();
        if self.data.len() != expected {
            return Err(EvalError::Config(format!(
                "tensor with shape {:?} needs {} bytes, found {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(self
            .data
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    }

    fn view(&self) -> Result<TensorView<'_>> {
        Ok(TensorView::new(self.dtype, self.shape.clone(), &self.data)?)
    }
}

/// An in-memory checkpoint: string metadata plus named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    metadata: HashMap<String, String>,
    parameters: BTreeMap<String, Parameter>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, parameter: Parameter) -> Self {
        self.parameters.insert(name.into(), parameter);
        self
    }

    /// Reads a checkpoint file.
    ///
    /// A missing file is a configuration error and is reported as such.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EvalError::ModelNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let tensors = SafeTensors::deserialize(bytes)?;
        let parameters = tensors
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let parameter = Parameter {
                    dtype: view.dtype(),
                    shape: view.shape().to_vec(),
                    data: view.data().to_vec(),
                };
                (name, parameter)
            })
            .collect();

        Ok(Self {
            metadata,
            parameters,
        })
    }

    /// Serializes the checkpoint to safetensors bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let views = self
            .parameters
            .iter()
            .map(|(name, p)| Ok((name.as_str(), p.view()?)))
            .collect::<Result<Vec<_>>>()?;
        let info = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone())
        };
        Ok(safetensors::serialize(views, &info)?)
    }

    /// Writes the checkpoint atomically: a temp file in the target directory
    /// is renamed into place, so a failure never leaves a partial file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| EvalError::Io(e.error))?;
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn metadata_map(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Parses a JSON-encoded metadata entry. `Ok(None)` if the key is absent.
    pub fn metadata_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.metadata
            .get(key)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(EvalError::from)
    }

    pub fn model_type(&self) -> Result<&str> {
        self.metadata(MODEL_TYPE_KEY).ok_or_else(|| {
            EvalError::Config(format!(
                "checkpoint metadata has no '{MODEL_TYPE_KEY}' entry"
            ))
        })
    }

    pub fn vocab(&self) -> Result<Vec<String>> {
        self.metadata_json(VOCAB_KEY)?
            .ok_or_else(|| EvalError::MissingParameter {
                key: VOCAB_KEY.to_string(),
            })
    }

    /// The validation set baked into the checkpoint, if any.
    pub fn validation_set(&self) -> Result<Option<Vec<Sample>>> {
        self.metadata_json(VALIDATION_KEY)
    }

    pub fn parameter(&self, key: &str) -> Result<&Parameter> {
        self.parameters
            .get(key)
            .ok_or_else(|| EvalError::MissingParameter {
                key: key.to_string(),
            })
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Copies the named parameters into a new checkpoint with no metadata.
    ///
    /// Every key must exist; nothing is returned on the first missing one.
    pub fn project<S: AsRef<str>>(&self, keys: &[S]) -> Result<Checkpoint> {
        let mut projected = Checkpoint::new();
        for key in keys {
            let key = key.as_ref();
            projected = projected.with_parameter(key, self.parameter(key)?.clone());
        }
        Ok(projected)
    }
}
