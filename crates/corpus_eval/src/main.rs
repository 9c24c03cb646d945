use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use corpus_eval::corpus::{Corpus, InMemoryCorpus, ParallelTextCorpus};
use corpus_eval::engine::{build_engine, Checkpoint};
use corpus_eval::logging::{self, LogConfig, LogFormat};
use corpus_eval::output::write_results_file;
use corpus_eval::pipeline::{self, FailurePolicy, PipelineConfig, PoolManager};
use corpus_eval::EvalError;

/// Score a corpus with a trained model and report perplexity.
#[derive(Parser, Debug)]
#[command(name = "corpus-eval", author, version, about)]
struct Cli {
    /// Model checkpoint (.safetensors)
    model: PathBuf,

    /// Scoring workers (0 = auto: half the logical CPUs minus one)
    #[arg(short = 'j', long, default_value_t = 0)]
    workers: usize,

    /// Source-side files, line-aligned with the reference files
    #[arg(long, num_args = 1.., requires = "reference")]
    source: Vec<PathBuf>,

    /// Reference files to score (default: the validation set stored in the model)
    #[arg(long, num_args = 1..)]
    reference: Vec<PathBuf>,

    /// Write per-sample log-probabilities here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Capacity of the work queue
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,

    /// Capacity of the result queue
    #[arg(long, default_value_t = 64)]
    result_capacity: usize,

    /// Abort if no result arrives for this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// What to do when a sample cannot be scored: fail or skip
    #[arg(long, default_value_t = FailurePolicy::FailFast)]
    on_error: FailurePolicy,

    /// Log progress every N samples
    #[arg(long, default_value_t = 100)]
    progress_every: usize,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log format: pretty, compact or json
    #[arg(long, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::builder()
            .num_workers(self.workers)
            .queue_capacity(self.queue_capacity)
            .result_capacity(self.result_capacity)
            .result_timeout(Duration::from_secs(self.timeout_secs))
            .failure_policy(self.on_error)
            .progress_interval(self.progress_every)
            .build()
    }

    fn corpus(&self, checkpoint: &Checkpoint) -> Result<Box<dyn Corpus>> {
        if !self.reference.is_empty() {
            let corpus = ParallelTextCorpus::new(self.source.clone(), self.reference.clone());
            corpus.check_files()?;
            return Ok(Box::new(corpus));
        }

        let samples = checkpoint.validation_set()?.ok_or_else(|| {
            EvalError::Config(format!(
                "{} has no built-in validation set; pass --reference",
                self.model.display()
            ))
        })?;
        tracing::info!(samples = samples.len(), "Using validation set stored in the model");
        Ok(Box::new(InMemoryCorpus::new(samples)))
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(
        LogConfig::from_verbosity(cli.verbose, cli.quiet)
            .with_format(cli.log_format)
            .with_env_overrides(),
    );

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.pipeline_config();
    config.validate()?;

    let checkpoint = Checkpoint::load(&cli.model)
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;
    let corpus = cli.corpus(&checkpoint)?;
    let engine = build_engine(&checkpoint)?;
    drop(checkpoint);

    let pool = PoolManager::spawn(engine, &config)?;
    let shutdown = pool.shutdown_handle();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted; stopping workers");
        shutdown.shutdown();
    })
    .context("Failed to install Ctrl-C handler")?;

    let report = pipeline::run(pool, corpus.as_ref(), &config)?;

    if let Some(path) = &cli.output {
        write_results_file(path, &report.results)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if !report.skipped.is_empty() {
        eprintln!(
            "warning: {} of {} samples could not be scored and were skipped",
            report.skipped.len(),
            report.num_samples()
        );
    }
    match report.perplexity() {
        Some(ppl) => println!("perplexity: {:.4}", ppl),
        None => println!("perplexity: undefined (no tokens scored)"),
    }
    Ok(())
}
