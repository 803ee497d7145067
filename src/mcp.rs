//! MCP server implementation using rmcp.
//!
//! Exposes the execution pipeline as a single `run_code` tool.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::Error;
use crate::executor::{ExecutionProfile, Executor};
use crate::language::Language;

/// MCP server for sandboxed code execution.
#[derive(Clone)]
pub struct SandboxServer {
    executor: Arc<Executor>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the `run_code` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCodeParams {
    /// The language of the submission (e.g., "python", "javascript", "cpp").
    #[schemars(description = "The language of the submission: 'python', 'javascript' or 'cpp'")]
    pub language: String,

    /// The source code to compile and run.
    #[schemars(description = "The source code to compile and run")]
    pub code: String,
}

fn supported_languages() -> Vec<&'static str> {
    Language::ALL.iter().map(|lang| lang.as_str()).collect()
}

#[tool_router]
impl SandboxServer {
    /// Create a new sandbox server.
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            tool_router: Self::tool_router(),
        }
    }

    /// Compile (if needed) and run code in a disposable container.
    #[tool(description = "Run code in a disposable, network-less container and return its output")]
    async fn run_code(
        &self,
        Parameters(params): Parameters<RunCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(language = %params.language, code_len = params.code.len(), "Running code");

        let executor = Arc::clone(&self.executor);
        let RunCodeParams { language, code } = params;
        let joined = tokio::spawn(async move {
            executor
                .execute(&code, &language, ExecutionProfile::Interactive)
                .await
        })
        .await
        .map_err(|e| McpError::internal_error(format!("Execution task failed: {e}"), None))?;

        match joined {
            Ok(result) => {
                let is_error = !result.is_success();

                // Combine stdout/stderr
                let output = if result.stderr.is_empty() {
                    result.stdout
                } else if result.stdout.is_empty() {
                    result.stderr
                } else {
                    format!("{}\n--- stderr ---\n{}", result.stdout, result.stderr)
                };

                if is_error {
                    Ok(CallToolResult::error(vec![Content::text(output)]))
                } else {
                    Ok(CallToolResult::success(vec![Content::text(output)]))
                }
            }
            Err(Error::UnsupportedLanguage(id)) => Err(McpError::invalid_params(
                format!(
                    "Unsupported language: '{id}'. Available: {:?}",
                    supported_languages()
                ),
                None,
            )),
            Err(e) => {
                error!(error = %e, "Execution failed");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Execution error: {e}"
                ))]))
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        let languages = supported_languages();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "lintx-runner".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Run untrusted code in disposable containers without network access.\n\
                 Supported languages: {languages:?}\n\
                 \n\
                 Use the 'run_code' tool with:\n\
                 - language: one of {languages:?}\n\
                 - code: the program to run"
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio(executor: Arc<Executor>) -> anyhow::Result<()> {
    let server = SandboxServer::new(executor);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InvocationOutput, IsolationBackend};
    use crate::executor::tests::{exited, test_config, MockBackend};

    fn server(dir: &tempfile::TempDir, backend: MockBackend) -> SandboxServer {
        let backend: Arc<dyn IsolationBackend> = Arc::new(backend);
        let executor = Executor::new(&test_config(dir), backend).unwrap();
        SandboxServer::new(Arc::new(executor))
    }

    fn params(language: &str, code: &str) -> Parameters<RunCodeParams> {
        Parameters(RunCodeParams {
            language: language.to_string(),
            code: code.to_string(),
        })
    }

    #[tokio::test]
    async fn test_run_code_success() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir, MockBackend::new(|_| Ok(exited(0, "hi\n", ""))));

        let result = server.run_code(params("python", "print('hi')")).await.unwrap();
        assert!(!result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_run_code_timeout_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir, MockBackend::new(|_| Ok(InvocationOutput::timed_out())));

        let result = server
            .run_code(params("javascript", "while(true){}"))
            .await
            .unwrap();
        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_run_code_unknown_language() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(&dir, MockBackend::echo());

        let result = server.run_code(params("cobol", "DISPLAY 'HI'.")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_info_lists_languages() {
        let dir = tempfile::tempdir().unwrap();
        let info = server(&dir, MockBackend::echo()).get_info();
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("python"));
        assert!(instructions.contains("cpp"));
    }
}
