//! Corpus evaluation on a fixed pool of scoring workers.
//!
//! ```no_run
//! use corpus_eval::corpus::ParallelTextCorpus;
//! use corpus_eval::engine::load_engine;
//! use corpus_eval::pipeline::{evaluate, PipelineConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = load_engine("model.safetensors")?;
//! let corpus = ParallelTextCorpus::references_only(vec!["valid.txt".into()]);
//! let config = PipelineConfig::builder().num_workers(4).build();
//! let report = evaluate(engine, &corpus, &config)?;
//! println!("perplexity: {:?}", report.perplexity());
//! # Ok(())
//! # }
//! ```

pub mod corpus;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod sample;

pub use error::{EvalError, Result};
pub use pipeline::{evaluate, run, EvalReport, PipelineConfig, PoolManager};
pub use sample::Sample;
