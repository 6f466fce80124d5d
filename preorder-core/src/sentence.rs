use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint, Fingerprint};

/// A source sentence as a flat table of factor fingerprints.
///
/// The input line is tab-separated into `factors` columns (surface form, tag,
/// class, ...), each column space-separated into one value per token. Every
/// value is fingerprinted independently at load time; the original strings are
/// not kept.
#[derive(Clone, Debug)]
pub struct Sentence {
    factors: usize,
    fps: Vec<Fingerprint>,
}

impl Sentence {
    /// Parse one input line. Column/token count mismatches are data-pipeline
    /// bugs and abort the process.
    pub fn from_line(line: &str, factors: usize) -> Sentence {
        let columns: Vec<&str> = line.split('\t').collect();
        assert!(
            columns.len() == factors,
            "sentence line has {} factor columns, expected {}: {}",
            columns.len(),
            factors,
            line
        );
        let length = columns[0].split(' ').count();
        let mut fps = vec![0u64; length * factors];
        for (k, column) in columns.iter().enumerate() {
            let tokens: Vec<&str> = column.split(' ').collect();
            assert!(
                tokens.len() == length,
                "factor column {} has {} tokens, expected {}: {}",
                k,
                tokens.len(),
                length,
                line
            );
            for (pos, token) in tokens.iter().enumerate() {
                fps[pos * factors + k] = fingerprint(token);
            }
        }
        Sentence { factors, fps }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fps.len() / self.factors
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fps.is_empty()
    }

    #[inline]
    pub fn factors(&self) -> usize {
        self.factors
    }

    /// Fingerprint of factor `k` of the token at `pos`.
    #[inline]
    pub fn factor(&self, pos: usize, k: usize) -> Fingerprint {
        self.fps[pos * self.factors + k]
    }
}

/// Load a file of factored sentence lines.
pub fn load_sentences(path: &Path, factors: usize) -> Result<Vec<Sentence>> {
    let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let sentences: Vec<Sentence> = data
        .lines()
        .map(|line| Sentence::from_line(line, factors))
        .collect();
    info!(path = %path.display(), count = sentences.len(), "loaded input sentences");
    Ok(sentences)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_factor_columns() {
        let s = Sentence::from_line("a b c\tDT NN VB\tc1 c2 c3", 3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.factors(), 3);
        assert_eq!(s.factor(0, 0), fingerprint("a"));
        assert_eq!(s.factor(1, 1), fingerprint("NN"));
        assert_eq!(s.factor(2, 2), fingerprint("c3"));
    }

    #[test]
    fn single_factor_line() {
        let s = Sentence::from_line("x y", 1);
        assert_eq!(s.len(), 2);
        assert_eq!(s.factor(1, 0), fingerprint("y"));
    }

    #[test]
    #[should_panic(expected = "factor columns")]
    fn wrong_column_count_is_fatal() {
        Sentence::from_line("a b\tDT NN", 3);
    }

    #[test]
    #[should_panic(expected = "tokens")]
    fn ragged_columns_are_fatal() {
        Sentence::from_line("a b c\tDT NN", 2);
    }
}
