//! lintx-runner
//!
//! Runs untrusted code in disposable containers. Serves the HTTP API by
//! default, or MCP over stdio with `--stdio`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lintx_runner::backend::DockerBackend;
use lintx_runner::config::Config;
use lintx_runner::feedback::{ChatCompletionsClient, TextGenerator};
use lintx_runner::{http, mcp, Executor};

#[derive(Parser, Debug)]
#[command(name = "lintx-runner")]
#[command(about = "Sandboxed code execution over HTTP or MCP")]
struct Args {
    /// JSON configuration file (all fields optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run in stdio mode (for MCP clients) instead of serving HTTP
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        image = %config.image,
        staging_root = %config.staging_root.display(),
        max_concurrent = ?config.max_concurrent,
        "Loaded configuration"
    );

    let backend = Arc::new(DockerBackend::from_config(&config));
    let executor = Arc::new(
        Executor::new(&config, backend).context("Failed to prepare staging root")?,
    );

    if args.stdio {
        return mcp::serve_stdio(executor).await;
    }

    let generator = ChatCompletionsClient::from_config(&config.generator)
        .map(|client| Arc::new(client) as Arc<dyn TextGenerator>);
    if generator.is_none() {
        warn!("GROQ_API_KEY not set; /api/feedback and /api/annotate are disabled");
    }

    let app = http::router(
        http::AppState::new(executor, generator),
        &config.http.allowed_origins,
    )?;
    http::serve(app, config.http.addr).await
}
