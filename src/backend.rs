//! Isolation backend trait and implementations.
//!
//! A backend launches one command inside a fresh, disposable isolated
//! environment with a workspace mounted, under a hard wall-clock deadline.

mod docker;

pub use docker::DockerBackend;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Stderr reported in place of the real cause when the deadline expires.
pub const TIMEOUT_SENTINEL: &str = "Execution timed out";

/// One command to run in a fresh isolated environment.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Entry command, already expanded to in-container paths.
    pub argv: Vec<String>,
    /// Host directory to bind-mount read/write.
    pub mount_host: PathBuf,
    /// Where `mount_host` appears inside the environment.
    pub mount_container: String,
    /// Hard wall-clock deadline.
    pub timeout: Duration,
}

/// Captured result of an [`Invocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutput {
    /// Exit code of the process (0 = success, -1 if killed by a signal).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether the deadline expired and the environment was torn down.
    pub timed_out: bool,
}

impl InvocationOutput {
    /// Result reported when the deadline expired.
    pub fn timed_out() -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: TIMEOUT_SENTINEL.to_string(),
            timed_out: true,
        }
    }

    pub const fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Trait for isolation backends.
///
/// Non-zero exit codes are data, not errors. Implementations return `Err`
/// only when the environment could not be launched or observed at all.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Run `invocation` to completion or until its deadline.
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput>;
}
