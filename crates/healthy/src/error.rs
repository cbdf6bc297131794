//! Error types for checks and the checker lifecycle.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single check execution.
///
/// Task errors never escape their execution rule: the checker folds them
/// into the consecutive-failure state and hands them to the notifier.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{error}")]
    Failed { error: String },

    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("task panicked: {message}")]
    Panicked { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Build a `Failed` error from any message.
    pub fn failed(error: impl Into<String>) -> Self {
        TaskError::Failed {
            error: error.into(),
        }
    }
}

/// Errors raised by the checker itself when its lifecycle contract is broken.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckerError {
    #[error("checker is already running")]
    AlreadyRunning,
}

pub type CheckerResult<T> = Result<T, CheckerError>;

/// Errors building a probe from its configuration.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("unsupported scheme in {0}: only http is supported")]
    UnsupportedScheme(String),

    #[error("url has no host: {0}")]
    MissingHost(String),
}
