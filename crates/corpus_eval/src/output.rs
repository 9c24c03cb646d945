//! Per-sample log-probability output.
//!
//! One line per scored sample, in corpus order:
//!
//! ```text
//! <index> ||| <per-token log-probs, space separated> ||| <sentence log-prob>
//! ```

use crate::error::{EvalError, Result};
use crate::pipeline::ResultItem;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const FIELD_SEPARATOR: &str = " ||| ";

pub fn format_line(item: &ResultItem) -> String {
    let log_probs = item
        .log_probs
        .iter()
        .map(|lp| lp.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{}{sep}{}{sep}{}\n",
        item.index,
        log_probs,
        item.score,
        sep = FIELD_SEPARATOR
    )
}

pub fn write_results<W: Write>(writer: &mut W, results: &[ResultItem]) -> std::io::Result<()> {
    for item in results {
        writer.write_all(format_line(item).as_bytes())?;
    }
    writer.flush()
}

/// Writes the file through a temp file in the same directory, so readers
/// never see a partially written output.
pub fn write_results_file(path: impl AsRef<Path>, results: &[ResultItem]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write_results(&mut writer, results)?;
    }
    tmp.persist(path).map_err(|e| EvalError::Io(e.error))?;
    tracing::info!(path = %path.display(), lines = results.len(), "Wrote per-sample log-probabilities");
    Ok(())
}
