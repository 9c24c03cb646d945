use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use corpus_eval::logging::{self, LogConfig};
use weight_tools::{extract_file, ExtractMode};

/// Copy selected parameters out of a checkpoint into a new file.
#[derive(Parser, Debug)]
#[command(name = "weight-extract", author, version, about)]
struct Cli {
    /// Source checkpoint (.safetensors)
    checkpoint: PathBuf,

    /// Parameter to extract; repeat for several
    #[arg(short, long = "key", required = true, num_args = 1..)]
    keys: Vec<String>,

    /// Destination file
    #[arg(short, long)]
    output: PathBuf,

    /// Keep model type and vocabulary so the output loads as a model
    #[arg(long)]
    wrap: bool,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    logging::init(LogConfig::from_verbosity(cli.verbose, false).with_env_overrides());

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mode = if cli.wrap {
        ExtractMode::Wrapped
    } else {
        ExtractMode::Bare
    };
    let extracted = extract_file(&cli.checkpoint, cli.keys.as_slice(), &cli.output, mode)
        .with_context(|| format!("Failed to extract from {}", cli.checkpoint.display()))?;
    println!(
        "wrote {} parameter(s) to {}",
        extracted.len(),
        cli.output.display()
    );
    Ok(())
}
