//! src/corpus/text.rs
//!
//! Line-aligned text corpora. Line `i` of the source files pairs with line
//! `i` of the reference files; blank lines are kept so the pairing holds.

use super::{Corpus, SampleStream};
use crate::sample::Sample;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

type LineStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Reads a text file line by line, blank lines included.
///
/// # Example
/// ```ignore
/// let lines = TextLines::new("refs.txt");
/// for line in lines.stream()? {
///     let line = line?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TextLines {
    path: PathBuf,
}

impl TextLines {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn stream(&self) -> Result<LineStream> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open text file: {}", self.path.display()))?;

        let path = self.path.clone();
        let iter = BufReader::new(file)
            .lines()
            .enumerate()
            .map(move |(line_num, line)| {
                line.with_context(|| {
                    format!("Error reading {} line {}", path.display(), line_num + 1)
                })
            });
        Ok(Box::new(iter))
    }
}

/// Concatenates several files into one line stream. Files are opened lazily.
fn chained_lines(paths: &[PathBuf]) -> LineStream {
    let paths = paths.to_vec();
    Box::new(
        paths
            .into_iter()
            .flat_map(|path| match TextLines::new(path).stream() {
                Ok(lines) => lines,
                Err(e) => Box::new(std::iter::once(Err(e))) as LineStream,
            }),
    )
}

/// Corpus read from line-aligned source and reference files.
///
/// Multiple files on each side are concatenated in order. With no source
/// files every sample has an empty source (language-model scoring).
///
/// The number of samples is unknown until the files are read, so
/// [`Corpus::len`] returns `None`.
#[derive(Debug, Clone, Default)]
pub struct ParallelTextCorpus {
    sources: Vec<PathBuf>,
    references: Vec<PathBuf>,
}

impl ParallelTextCorpus {
    pub fn new(sources: Vec<PathBuf>, references: Vec<PathBuf>) -> Self {
        Self {
            sources,
            references,
        }
    }

    pub fn references_only(references: Vec<PathBuf>) -> Self {
        Self::new(Vec::new(), references)
    }

    /// Fails early if any named file is missing.
    pub fn check_files(&self) -> Result<()> {
        for path in self.sources.iter().chain(&self.references) {
            if !Path::new(path).is_file() {
                return Err(anyhow!("Corpus file not found: {}", path.display()));
            }
        }
        if self.references.is_empty() {
            return Err(anyhow!("At least one reference file is required"));
        }
        Ok(())
    }
}

impl Corpus for ParallelTextCorpus {
    fn stream(&self) -> Result<SampleStream> {
        let references = chained_lines(&self.references);
        if self.sources.is_empty() {
            return Ok(Box::new(
                references.map(|line| line.map(Sample::reference_only)),
            ));
        }
        Ok(Box::new(AlignedLines {
            sources: chained_lines(&self.sources),
            references,
            line: 0,
            done: false,
        }))
    }
}

/// Zips source and reference lines, failing once if one side runs out first.
struct AlignedLines {
    sources: LineStream,
    references: LineStream,
    line: usize,
    done: bool,
}

impl Iterator for AlignedLines {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match (self.sources.next(), self.references.next()) {
            (None, None) => None,
            (Some(Ok(source)), Some(Ok(reference))) => Some(Ok(Sample::new(source, reference))),
            (Some(Err(e)), _) | (_, Some(Err(e))) => Some(Err(e)),
            (Some(_), None) => Some(Err(anyhow!(
                "Source files have more lines than reference files ({} references)",
                self.line
            ))),
            (None, Some(_)) => Some(Err(anyhow!(
                "Reference files have more lines than source files ({} sources)",
                self.line
            ))),
        };
        match &item {
            Some(Ok(_)) => self.line += 1,
            _ => self.done = true,
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(file)
    }

    #[test]
    fn test_text_lines_keeps_blank_lines() -> Result<()> {
        let file = write_lines(&["line1", "", "  \t", "line2"])?;
        let kept: Vec<String> = TextLines::new(file.path()).stream()?.collect::<Result<_>>()?;
        assert_eq!(kept, vec!["line1", "", "  \t", "line2"]);
        Ok(())
    }

    #[test]
    fn test_blank_lines_keep_sources_aligned() -> Result<()> {
        let src = write_lines(&["s0", "", "s2"])?;
        let refs = write_lines(&["r0", "r1", ""])?;
        let corpus = ParallelTextCorpus::new(vec![src.path().into()], vec![refs.path().into()]);
        let samples: Vec<Sample> = corpus.stream()?.collect::<Result<_>>()?;
        assert_eq!(
            samples,
            vec![
                Sample::new("s0", "r0"),
                Sample::new("", "r1"),
                Sample::new("s2", ""),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parallel_corpus_concatenates_and_aligns() -> Result<()> {
        let src_a = write_lines(&["s0", "s1"])?;
        let src_b = write_lines(&["s2"])?;
        let ref_a = write_lines(&["r0"])?;
        let ref_b = write_lines(&["r1", "r2"])?;

        let corpus = ParallelTextCorpus::new(
            vec![src_a.path().into(), src_b.path().into()],
            vec![ref_a.path().into(), ref_b.path().into()],
        );
        corpus.check_files()?;
        assert_eq!(corpus.len(), None);

        let samples: Vec<Sample> = corpus.stream()?.collect::<Result<_>>()?;
        assert_eq!(
            samples,
            vec![
                Sample::new("s0", "r0"),
                Sample::new("s1", "r1"),
                Sample::new("s2", "r2"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parallel_corpus_length_mismatch_is_an_error() -> Result<()> {
        let src = write_lines(&["s0", "s1", "s2"])?;
        let refs = write_lines(&["r0"])?;
        let corpus = ParallelTextCorpus::new(vec![src.path().into()], vec![refs.path().into()]);

        let items: Vec<_> = corpus.stream()?.collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("more lines"), "unexpected error: {err}");
        Ok(())
    }

    #[test]
    fn test_reference_only_corpus() -> Result<()> {
        let refs = write_lines(&["a b", "c"])?;
        let corpus = ParallelTextCorpus::references_only(vec![refs.path().into()]);
        let samples: Vec<Sample> = corpus.stream()?.collect::<Result<_>>()?;
        assert_eq!(samples[1], Sample::reference_only("c"));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_reported() {
        let corpus = ParallelTextCorpus::references_only(vec!["/nonexistent/refs.txt".into()]);
        assert!(corpus.check_files().is_err());
    }
}
