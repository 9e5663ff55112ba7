//! Error taxonomy for the extraction pipeline.
//!
//! Every variant is terminal for the current invocation; nothing is retried.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The keyword file is missing or does not have the expected shape.
    #[error("keyword configuration {}: {reason}", .path.display())]
    Configuration { path: PathBuf, reason: String },

    /// The PDF is missing, unreadable, or cannot be parsed.
    #[error("PDF input {}: {reason}", .path.display())]
    Input { path: PathBuf, reason: String },

    /// No keyword matched any fragment on the first page.
    #[error("no keyword matched any text on the first page")]
    EmptyResult,

    /// Persisting an encoding or sample file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF parsing did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn configuration(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Configuration {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn input(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Input {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit status for this error. Automation callers treat an
    /// empty result the same as any other failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
