//! Error taxonomy for the execution pipeline.
//!
//! Only failures that prevent an execution from happening at all are
//! errors. Compile failures, runtime failures and timeouts are reported as
//! data through [`crate::executor::ExecutionResult`].

use thiserror::Error;

/// Errors surfaced by the execution pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The language identifier is not in the registry. Nothing was executed.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The staging workspace could not be created, written or removed.
    #[error("Workspace error: {message}")]
    Workspace {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The isolation runtime could not be launched or waited on.
    #[error("Isolation error: {0:#}")]
    Isolation(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn workspace(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            message: message.into(),
            source,
        }
    }

    /// Whether the caller sent a request that can never succeed.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage(_))
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
