// src/error.rs
// Error taxonomy for the pipeline. Per-source and per-article failures are
// recoverable and recorded in the run summary; only storage failures abort a run.

use thiserror::Error;

/// Failure while fetching or parsing one source. Recoverable: the orchestrator
/// records it and moves on to the next source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("per-run request budget exhausted")]
    BudgetExhausted,
}

/// Failure while classifying one article.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Endpoint unreachable, rate-limited, or timed out. Retried with backoff
    /// before surfacing; still recoverable afterwards (article marked failed).
    #[error("classifier transport failure: {0}")]
    Transport(String),

    /// Response did not match the extraction schema. The article stays
    /// retryable on a later run; the cache is never populated from this path.
    #[error("classifier response rejected: {0}")]
    Schema(String),
}

/// Storage-layer failure. `Validation` flags a contract violation at
/// `insert_event` (confidence below the gate, or a non-actionable category);
/// `Sqlite` is fatal to the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}
