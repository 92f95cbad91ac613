//! Errors of the codebook pipeline.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CodebookError>;

/// Every error is fatal to a run.
#[derive(Error, Debug)]
pub enum CodebookError {
    /// Bad numeric token, inconsistent dimension or a corrupted vector file.
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput {
        /// 1-based line (or record) number
        line: usize,
        /// what went wrong
        reason: String,
    },
    /// Fewer vectors than requested clusters.
    #[error("insufficient data: {population} vectors for {n_cluster} clusters")]
    InsufficientData {
        /// number of vectors
        population: usize,
        /// requested number of clusters
        n_cluster: usize,
    },
    /// Zero clusters or an empty population.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    /// Invalid run configuration.
    #[error("usage: {0}")]
    Usage(String),
    /// I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodebookError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            reason: reason.into(),
        }
    }
}
