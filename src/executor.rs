//! Execution orchestrator.
//!
//! Drives one submission through resolve → stage → compile → run → release
//! and folds every execution-phase failure into an [`ExecutionResult`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::backend::{Invocation, InvocationOutput, IsolationBackend, TIMEOUT_SENTINEL};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::language::{self, Language};
use crate::workspace::{Workspace, WorkspaceManager};

/// Which run-step deadline applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProfile {
    /// Plain "run my code" requests.
    #[default]
    Interactive,
    /// Runs whose output feeds a critique; allowed a longer deadline.
    Feedback,
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The compiler exited non-zero; the run step was skipped.
    CompileFailure,
    /// The program exited non-zero.
    RuntimeFailure,
    /// The compile or run deadline expired.
    Timeout,
}

/// Captured output of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub outcome: Outcome,
}

impl ExecutionResult {
    fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMEOUT_SENTINEL.to_string(),
            outcome: Outcome::Timeout,
        }
    }

    fn compile_failure(output: InvocationOutput) -> Self {
        Self {
            stdout: String::new(),
            stderr: output.stderr,
            outcome: Outcome::CompileFailure,
        }
    }

    fn from_run(output: InvocationOutput) -> Self {
        if output.timed_out {
            return Self::timed_out();
        }
        let outcome = if output.exit_code == 0 {
            Outcome::Success
        } else {
            Outcome::RuntimeFailure
        };
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Public entry point of the execution pipeline.
pub struct Executor {
    backend: Arc<dyn IsolationBackend>,
    workspaces: WorkspaceManager,
    compile_timeout: Duration,
    run_timeout: Duration,
    feedback_run_timeout: Duration,
    permits: Option<Semaphore>,
}

impl Executor {
    /// Build the executor, creating the staging root if needed.
    pub fn new(config: &Config, backend: Arc<dyn IsolationBackend>) -> Result<Self> {
        let workspaces = WorkspaceManager::new(&config.staging_root, config.mount_point.clone())?;
        Ok(Self {
            backend,
            workspaces,
            compile_timeout: config.compile_timeout(),
            run_timeout: config.run_timeout(),
            feedback_run_timeout: config.feedback_run_timeout(),
            permits: config.max_concurrent.map(Semaphore::new),
        })
    }

    pub const fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Executions that may start right now without waiting, if capped.
    pub fn available_slots(&self) -> Option<usize> {
        self.permits.as_ref().map(Semaphore::available_permits)
    }

    /// Compile (if needed) and run `source_code` as `language_id`.
    ///
    /// Fails only with [`Error::UnsupportedLanguage`] before anything runs,
    /// or when the workspace or the isolation runtime itself fails. The
    /// workspace is removed on every path.
    #[instrument(skip(self, source_code, language_id), fields(language = %language_id, code_len = source_code.len()))]
    pub async fn execute(
        &self,
        source_code: &str,
        language_id: &str,
        profile: ExecutionProfile,
    ) -> Result<ExecutionResult> {
        let language = language::resolve(language_id)?;

        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|e| Error::Isolation(anyhow::anyhow!("Execution slots closed: {e}")))?,
            ),
            None => None,
        };

        let workspace = self
            .workspaces
            .acquire(source_code, language.recipe().extension)
            .await?;
        debug!(workspace = %workspace.id(), "Staged submission");

        let result = self.run_phases(&workspace, language, profile).await;

        // A failed removal must not discard the program's output.
        if let Err(e) = workspace.release().await {
            error!(error = %e, "Failed to release workspace");
        }

        let result = result?;
        info!(outcome = ?result.outcome, "Execution finished");
        Ok(result)
    }

    async fn run_phases(
        &self,
        workspace: &Workspace,
        language: Language,
        profile: ExecutionProfile,
    ) -> Result<ExecutionResult> {
        let recipe = language.recipe();
        let source = workspace.container_source();
        let workdir = workspace.container_dir();

        if let Some(argv) = recipe.compile_argv(&source, workdir) {
            let output = self
                .backend
                .invoke(&self.invocation(workspace, argv, self.compile_timeout))
                .await?;
            if output.timed_out {
                return Ok(ExecutionResult::timed_out());
            }
            if output.exit_code != 0 {
                debug!(exit_code = output.exit_code, "Compilation failed");
                return Ok(ExecutionResult::compile_failure(output));
            }
        }

        let timeout = match profile {
            ExecutionProfile::Interactive => self.run_timeout,
            ExecutionProfile::Feedback => self.feedback_run_timeout,
        };
        let output = self
            .backend
            .invoke(&self.invocation(workspace, recipe.run_argv(&source, workdir), timeout))
            .await?;

        Ok(ExecutionResult::from_run(output))
    }

    fn invocation(&self, workspace: &Workspace, argv: Vec<String>, timeout: Duration) -> Invocation {
        Invocation {
            argv,
            mount_host: workspace.host_dir().to_path_buf(),
            mount_container: workspace.container_dir().to_string(),
            timeout,
        }
    }
}
