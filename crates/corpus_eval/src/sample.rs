//! src/sample.rs
//!
//! The unit of scoring input.

use serde::{Deserialize, Serialize};

/// One unit of scoring input: a reference sentence and, for conditional
/// models, the source sentence it was produced from.
///
/// The pipeline never looks inside a `Sample`; only the scoring engine does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub source: String,
    pub reference: String,
}

impl Sample {
    pub fn new(source: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: reference.into(),
        }
    }

    /// A sample with no source side, for plain language-model scoring.
    pub fn reference_only(reference: impl Into<String>) -> Self {
        Self::new(String::new(), reference)
    }
}
