//! Process configuration.
//!
//! Loaded once at startup from an optional JSON file, then overridden by a
//! handful of environment variables. The resulting [`Config`] is immutable
//! and passed explicitly to every component that needs it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Top-level configuration for the runner.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host directory holding per-request workspaces. Created if absent.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Where a workspace is mounted inside the container.
    #[serde(default = "default_mount_point")]
    pub mount_point: String,

    /// Pre-built image carrying every language toolchain.
    #[serde(default = "default_image")]
    pub image: String,

    /// Container runtime CLI, e.g. `["docker"]` or `["sudo", "podman"]`.
    #[serde(default = "default_runtime_command")]
    pub runtime_command: Vec<String>,

    /// Deadline for the compile step.
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout_seconds: u64,

    /// Deadline for the run step of a plain execution.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Deadline for the run step when the result feeds a critique.
    #[serde(default = "default_feedback_run_timeout")]
    pub feedback_run_timeout_seconds: u64,

    /// Container memory limit in megabytes.
    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// Container process count limit.
    #[serde(default)]
    pub pids_limit: Option<u32>,

    /// Container CPU quota.
    #[serde(default)]
    pub cpus: Option<f64>,

    /// Cap on simultaneous executions. Unbounded when absent.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Origins allowed by CORS. Empty means no cross-origin access.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Text-generation endpoint used for critiques.
#[derive(Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    #[serde(default = "default_generator_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Only ever read from `GROQ_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_base_url(),
            model: default_generator_model(),
            temperature: 0.0,
            api_key: None,
        }
    }
}

/// Environment variables read once at startup.
#[derive(Debug, Default)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub staging_root: Option<PathBuf>,
    pub image: Option<String>,
}

impl EnvOverrides {
    /// Capture the overrides from the process environment.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            api_key: var("GROQ_API_KEY"),
            api_base_url: var("API_BASE_URL"),
            staging_root: var("LINTX_STAGING_ROOT").map(PathBuf::from),
            image: var("LINTX_IMAGE"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            mount_point: default_mount_point(),
            image: default_image(),
            runtime_command: default_runtime_command(),
            compile_timeout_seconds: default_compile_timeout(),
            run_timeout_seconds: default_run_timeout(),
            feedback_run_timeout_seconds: default_feedback_run_timeout(),
            memory_mb: None,
            pids_limit: None,
            cpus: None,
            max_concurrent: None,
            http: HttpConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or defaults) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_json(&json)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply(EnvOverrides::from_env());
        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Apply environment overrides on top of file values.
    pub fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(key) = overrides.api_key {
            self.generator.api_key = Some(key);
        }
        if let Some(origin) = overrides.api_base_url {
            if !self.http.allowed_origins.contains(&origin) {
                self.http.allowed_origins.push(origin);
            }
        }
        if let Some(root) = overrides.staging_root {
            self.staging_root = root;
        }
        if let Some(image) = overrides.image {
            self.image = image;
        }
    }

    /// Reject configurations that cannot run anything.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.runtime_command.is_empty(),
            "runtime_command must name a container runtime"
        );
        anyhow::ensure!(!self.image.is_empty(), "image must not be empty");
        anyhow::ensure!(
            self.mount_point.starts_with('/'),
            "mount_point must be an absolute path, got {:?}",
            self.mount_point
        );
        for (name, secs) in [
            ("compile_timeout_seconds", self.compile_timeout_seconds),
            ("run_timeout_seconds", self.run_timeout_seconds),
            ("feedback_run_timeout_seconds", self.feedback_run_timeout_seconds),
        ] {
            anyhow::ensure!(secs > 0, "{name} must be positive");
        }
        if let Some(max) = self.max_concurrent {
            anyhow::ensure!(max > 0, "max_concurrent must be positive when set");
        }
        Ok(())
    }

    pub const fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_seconds)
    }

    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    pub const fn feedback_run_timeout(&self) -> Duration {
        Duration::from_secs(self.feedback_run_timeout_seconds)
    }
}

fn default_staging_root() -> PathBuf {
    "sandbox".into()
}

fn default_mount_point() -> String {
    "/home/runner".into()
}

fn default_image() -> String {
    "lintx-image".into()
}

fn default_runtime_command() -> Vec<String> {
    vec!["docker".into()]
}

const fn default_compile_timeout() -> u64 {
    10
}

const fn default_run_timeout() -> u64 {
    5
}

const fn default_feedback_run_timeout() -> u64 {
    10
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_generator_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}

fn default_generator_model() -> String {
    "openai/gpt-oss-20b".into()
}
