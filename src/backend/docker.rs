//! Container backend implementation.
//!
//! Runs each invocation in a fresh `--rm` container with networking
//! disabled and only the workspace bind-mounted. Works with any runtime
//! that speaks the docker CLI (`docker`, `podman`, `sudo docker`).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{Invocation, InvocationOutput, IsolationBackend};
use crate::config::Config;

/// How long forced container removal may take before we give up on it.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Removal attempts after a timeout. A killed client can leave the daemon
/// creating the container after the first `rm -f` already found nothing.
const REMOVE_ATTEMPTS: u32 = 3;

const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Backend that launches one disposable container per invocation.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    runtime_command: Vec<String>,
    image: String,
    memory_mb: Option<u64>,
    pids_limit: Option<u32>,
    cpus: Option<f64>,
}

impl DockerBackend {
    /// Create a backend running `image` through `runtime_command`.
    pub fn new(runtime_command: Vec<String>, image: impl Into<String>) -> Self {
        Self {
            runtime_command,
            image: image.into(),
            memory_mb: None,
            pids_limit: None,
            cpus: None,
        }
    }

    /// Create a backend from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime_command: config.runtime_command.clone(),
            image: config.image.clone(),
            memory_mb: config.memory_mb,
            pids_limit: config.pids_limit,
            cpus: config.cpus,
        }
    }

    /// Arguments following the runtime command for one container.
    fn run_args(&self, name: &str, invocation: &Invocation) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            "none".to_string(),
        ];

        if let Some(mb) = self.memory_mb {
            args.push("--memory".to_string());
            args.push(format!("{mb}m"));
        }
        if let Some(pids) = self.pids_limit {
            args.push("--pids-limit".to_string());
            args.push(pids.to_string());
        }
        if let Some(cpus) = self.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }

        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:rw",
            invocation.mount_host.display(),
            invocation.mount_container
        ));
        args.push("-w".to_string());
        args.push(invocation.mount_container.clone());
        args.push(self.image.clone());
        args.extend(invocation.argv.iter().cloned());
        args
    }

    fn runtime(&self) -> Result<Command> {
        let (program, leading) = self
            .runtime_command
            .split_first()
            .context("Container runtime command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(leading);
        Ok(cmd)
    }

    /// Kill the runtime client and force-remove the container behind it.
    async fn teardown(&self, child: &mut Child, name: &str) {
        if let Err(e) = child.kill().await {
            warn!(container = %name, error = %e, "Failed to kill runtime client");
        }

        for attempt in 1..=REMOVE_ATTEMPTS {
            if self.remove_container(name).await {
                debug!(container = %name, attempt, "Container removed after timeout");
                return;
            }
            if attempt < REMOVE_ATTEMPTS {
                tokio::time::sleep(REMOVE_RETRY_DELAY).await;
            }
        }
        warn!(container = %name, attempts = REMOVE_ATTEMPTS, "Container may have outlived its deadline");
    }

    /// One `rm -f` attempt. Returns whether the runtime reported success.
    async fn remove_container(&self, name: &str) -> bool {
        let mut cmd = match self.runtime() {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(container = %name, error = %e, "Cannot remove container");
                return false;
            }
        };
        cmd.args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(REMOVE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                debug!(container = %name, %status, "Container removal exited unsuccessfully");
                false
            }
            Ok(Err(e)) => {
                warn!(container = %name, error = %e, "Failed to run container removal");
                false
            }
            Err(_) => {
                warn!(container = %name, "Container removal timed out");
                false
            }
        }
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    #[instrument(skip(self, invocation), fields(image = %self.image, timeout = ?invocation.timeout))]
    async fn invoke(&self, invocation: &Invocation) -> Result<InvocationOutput> {
        let name = format!("lintx-{}", Uuid::new_v4().simple());
        debug!(container = %name, argv = ?invocation.argv, "Launching container");

        let mut cmd = self.runtime()?;
        cmd.args(self.run_args(&name, invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn container runtime: {:?}", self.runtime_command))?;

        // Take pipe handles out so `child` stays usable for teardown
        let mut child_stdout = child.stdout.take().context("Failed to open stdout")?;
        let mut child_stderr = child.stderr.take().context("Failed to open stderr")?;

        let collect = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (r1, r2) = tokio::join!(
                child_stdout.read_to_end(&mut stdout_buf),
                child_stderr.read_to_end(&mut stderr_buf),
            );
            r1.context("Failed to read stdout")?;
            r2.context("Failed to read stderr")?;
            let status = child.wait().await.context("Failed to wait for container")?;
            Ok::<_, anyhow::Error>((status, stdout_buf, stderr_buf))
        };

        let deadline = tokio::time::timeout(invocation.timeout, collect).await;
        let Ok(collected) = deadline else {
            warn!(container = %name, "Deadline expired, tearing down container");
            self.teardown(&mut child, &name).await;
            return Ok(InvocationOutput::timed_out());
        };
        let (status, stdout_buf, stderr_buf) = collected?;

        let output = InvocationOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            timed_out: false,
        };

        debug!(container = %name, exit_code = output.exit_code, "Container exited");

        Ok(output)
    }
}
