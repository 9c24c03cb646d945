//! Logging setup for the command-line tools.
//!
//! # Environment Variables
//!
//! - `CORPUS_EVAL_LOG` - Log filter (overrides RUST_LOG)
//! - `CORPUS_EVAL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use corpus_eval::logging::{init, LogConfig};
//!
//! init(LogConfig::from_verbosity(1, false).with_env_overrides());
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "CORPUS_EVAL_LOG";
pub const LOG_FORMAT_ENV: &str = "CORPUS_EVAL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Filter directive; overrides `level` when set.
    pub filter: Option<String>,
    pub show_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            filter: None,
            show_thread_names: true,
        }
    }
}

impl LogConfig {
    /// Maps `-v` counts and `-q` to a level: quiet → WARN, 0 → INFO,
    /// 1 → DEBUG, 2+ → TRACE.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        };
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Applies `CORPUS_EVAL_LOG`/`RUST_LOG` (only when no filter is set yet)
    /// and `CORPUS_EVAL_LOG_FORMAT`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var(LOG_FILTER_ENV)
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }
        if let Some(format) = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }
}

/// Installs the global subscriber, writing to stderr. Later calls are ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_fmt::layer()
                    .compact()
                    .with_thread_names(config.show_thread_names)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_fmt::layer()
                    .with_thread_names(config.show_thread_names)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    // A subscriber already installed (tests, embedding) is not an error.
    let _ = result;
}
