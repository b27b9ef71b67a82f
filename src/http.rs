use crate::chat::{self, ChatError};
use crate::dispatch::CallResult;
use crate::health::{self, HealthChecker};
use crate::metrics::METRICS;
use crate::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Builds the HTTP surface: `/mcp`, `/chat`, health checks and metrics.
pub fn router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .with_state(Arc::new(HealthChecker::new(state.clone())));

    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/chat", post(chat_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(health_routes)
}

/// Failure body: `{"error": <message>}`, plus the model text when it could
/// not be decoded.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    raw: Option<String>,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            raw: None,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            raw: error.raw().map(str::to_string),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(raw) = self.raw {
            body["raw"] = Value::String(raw);
        }
        (self.status, Json(body)).into_response()
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::internal(format!("invalid request body: {e}")))
}

/// Runs the first call of `{"tool_calls": [...]}`. A bare call description
/// is accepted too.
async fn mcp_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let body: Value = parse_body(&body)?;
    let description = match body.get("tool_calls") {
        Some(Value::Array(calls)) => calls
            .first()
            .cloned()
            .ok_or_else(|| ApiError::internal("request contains no tool calls"))?,
        Some(_) => return Err(ApiError::internal("'tool_calls' must be an array")),
        None => body,
    };

    match state.dispatcher().dispatch_value(&description).await {
        Ok(result) => Ok(Json(CallResult::Success(result)).into_response()),
        Err(error) => Err(ApiError::internal(error.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: String,
}

async fn chat_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let request: ChatRequest = parse_body(&body)?;
    let outcome = chat::run_chat(&state, &request.prompt).await?;
    Ok(Json(outcome).into_response())
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        METRICS.encode(),
    )
}
