//! HTTP surface.
//!
//! Thin glue over [`Executor`]: execution-phase failures come back as data
//! in a `200` response; only malformed requests are client errors.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::executor::{ExecutionProfile, ExecutionResult, Executor};
use crate::feedback::{self, Critique, TextGenerator};

/// Set to `true` on critique responses built from a degraded payload.
pub const CRITIQUE_FALLBACK_HEADER: &str = "x-critique-fallback";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<Executor>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl AppState {
    pub fn new(executor: Arc<Executor>, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            executor,
            generator,
        }
    }
}

/// Body accepted by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    pub language: String,
}

/// Body returned by `/api/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub output: String,
    pub error: String,
}

impl From<ExecutionResult> for RunResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.stdout,
            error: result.stderr,
        }
    }
}

#[derive(Debug)]
enum ApiError {
    Pipeline(Error),
    Task(String),
    GeneratorUnavailable,
    Generator(anyhow::Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Pipeline(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Pipeline(e) => {
                error!(error = %e, "Execution pipeline failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Task(message) => {
                error!(%message, "Execution task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::GeneratorUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Text generation is not configured".to_string(),
            ),
            Self::Generator(e) => {
                warn!(error = %e, "Text generation failed");
                (StatusCode::BAD_GATEWAY, format!("Text generation failed: {e:#}"))
            }
        };

        let body = RunResponse {
            output: String::new(),
            error: message,
        };
        (status, Json(body)).into_response()
    }
}

/// Build the application router.
///
/// `allowed_origins` restricts CORS; an empty list allows no cross-origin
/// callers. A `*` entry allows any origin, without credentials.
pub fn router(state: AppState, allowed_origins: &[String]) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    let cors = if allowed_origins.iter().any(|origin| origin.trim() == "*") {
        warn!("CORS allows any origin; credentials are disabled");
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins = allowed_origins
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin: {origin}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        cors.allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    };

    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/api/run", post(run_code))
        .route("/api/feedback", post(feedback))
        .route("/api/annotate", post(annotate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Serve `app` on `addr` until the process is stopped.
pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Starting HTTP server");

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Run on a dedicated task so a dropped connection cannot interrupt an
/// execution between container launch and teardown.
async fn execute_detached(
    state: &AppState,
    request: CodeRequest,
    profile: ExecutionProfile,
) -> Result<ExecutionResult, ApiError> {
    let executor = Arc::clone(&state.executor);
    tokio::spawn(async move {
        executor
            .execute(&request.code, &request.language, profile)
            .await
    })
    .await
    .map_err(|e| ApiError::Task(e.to_string()))?
    .map_err(ApiError::from)
}

async fn run_code(
    State(state): State<AppState>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let result = execute_detached(&state, payload, ExecutionProfile::Interactive).await?;
    Ok(Json(result.into()))
}

/// Serialize a critique, flagging degraded payloads in a response header.
fn critique_response<T: Serialize>(critique: Critique<T>) -> Response {
    match critique {
        Critique::Parsed(value) => Json(value).into_response(),
        Critique::Fallback { value, raw } => {
            warn!(raw_len = raw.len(), "Returning degraded critique");
            debug!(%raw, "Unparsed generator payload");
            ([(CRITIQUE_FALLBACK_HEADER, "true")], Json(value)).into_response()
        }
    }
}

async fn feedback(
    State(state): State<AppState>,
    Json(payload): Json<CodeRequest>,
) -> Result<Response, ApiError> {
    let generator = state
        .generator
        .clone()
        .ok_or(ApiError::GeneratorUnavailable)?;

    let code = payload.code.clone();
    let result = execute_detached(&state, payload, ExecutionProfile::Feedback).await?;

    let prompt = feedback::feedback_prompt(&code, &result.stdout, &result.stderr);
    let raw = generator
        .generate(&prompt)
        .await
        .map_err(ApiError::Generator)?;

    Ok(critique_response(feedback::parse_feedback(&raw)))
}

async fn annotate(
    State(state): State<AppState>,
    Json(payload): Json<CodeRequest>,
) -> Result<Response, ApiError> {
    let generator = state.generator.ok_or(ApiError::GeneratorUnavailable)?;

    let raw = generator
        .generate(&feedback::annotation_prompt(&payload.code))
        .await
        .map_err(ApiError::Generator)?;

    Ok(critique_response(feedback::parse_annotation(
        &raw,
        &payload.code,
    )))
}
