use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but some capability is missing
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
            details: None,
        }
    }

    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// The process is up; nothing else is checked.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready unless a component is unhealthy. A missing model provider only
    /// degrades readiness, since `/mcp` still works without one.
    pub fn readiness(&self) -> ReadinessResponse {
        let mut components = BTreeMap::new();
        components.insert("workspace".to_string(), self.check_workspace());
        components.insert("tools".to_string(), self.check_tools());
        components.insert("model".to_string(), self.check_model());

        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, health| acc.combine(health.status));

        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: now(),
            components,
        }
    }

    fn check_workspace(&self) -> ComponentHealth {
        let config = self.state.config();
        let root = &config.workspace_root;
        match std::fs::metadata(root) {
            Ok(meta) if !meta.is_dir() => {
                ComponentHealth::unhealthy(format!("{} is not a directory", root.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                ComponentHealth::unhealthy(format!("{} is read-only", root.display()))
            }
            Ok(_) => ComponentHealth::healthy()
                .with_details(serde_json::json!({ "root": root.display().to_string() })),
            Err(e) => ComponentHealth::unhealthy(format!("{}: {e}", root.display())),
        }
    }

    fn check_tools(&self) -> ComponentHealth {
        let registry = self.state.registry();
        if registry.is_empty() {
            ComponentHealth::unhealthy("no tools registered")
        } else {
            ComponentHealth::healthy().with_details(serde_json::json!({ "tools": registry.names() }))
        }
    }

    fn check_model(&self) -> ComponentHealth {
        let config = self.state.config();
        match self.state.model() {
            Some(client) => ComponentHealth::healthy().with_details(serde_json::json!({
                "provider": client.provider(),
                "model": config.model.model,
            })),
            None => ComponentHealth::degraded(format!(
                "no API key for {}; set {}",
                config.model.provider,
                config.model.provider.api_key_env()
            )),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness()
}
