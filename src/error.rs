//! Error taxonomy for tool dispatch
//!
//! This module provides:
//! - Error codes (JSON-RPC standard + dispatch-specific codes)
//! - Typed dispatch and normalization errors
//! - Error telemetry counters
//! - Conversions to the rmcp and HTTP error surfaces

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::tools::BUILTIN_TOOL_NAMES;

/// Label shared by every tool name that is not a built-in tool.
pub const UNKNOWN_TOOL: &str = "unknown";

// =============================================================================
// ERROR CODES
// =============================================================================

/// Error codes following JSON-RPC 2.0 plus dispatch-specific codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32700 to -32603)
    /// Invalid JSON was received by the server
    ParseError = -32700,
    /// The JSON sent is not a valid request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,

    // Dispatch errors (-32000 to -32099)
    /// Call description lacks a tool name or an argument payload
    MalformedCall = -32001,
    /// Argument payload is not a mapping or decodable JSON text
    MalformedArguments = -32002,
    /// Tool name does not match any registered tool
    ToolNotFound = -32003,
    /// The resolved tool failed while running
    InvocationFailed = -32004,
    /// Model reply could not be reduced to call descriptions
    NormalizationFailed = -32005,
    /// No model provider is configured
    ModelUnavailable = -32006,
    /// The model provider request failed
    ModelRequestFailed = -32007,
}

impl ErrorCode {
    /// Get the integer code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Check if this error type is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::InternalError | ErrorCode::ModelRequestFailed)
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::ParseError
            | ErrorCode::InvalidRequest
            | ErrorCode::InvalidParams
            | ErrorCode::MalformedCall
            | ErrorCode::MalformedArguments => "client_error",
            ErrorCode::MethodNotFound | ErrorCode::ToolNotFound => "not_found",
            ErrorCode::InternalError => "server_error",
            ErrorCode::InvocationFailed => "invocation_error",
            ErrorCode::NormalizationFailed => "model_output_error",
            ErrorCode::ModelUnavailable | ErrorCode::ModelRequestFailed => "provider_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

// =============================================================================
// TYPED ERRORS
// =============================================================================

/// Failure while resolving or running one structured call description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("malformed tool call: {reason}")]
    MalformedCall { reason: String },

    #[error("malformed arguments for '{tool}': {reason}")]
    MalformedArguments { tool: String, reason: String },

    #[error("no tool found for '{name}' (available: {})", .available.join(", "))]
    ToolNotFound { name: String, available: Vec<String> },

    #[error("tool '{tool}' failed: {message}")]
    Invocation { tool: String, message: String },
}

impl DispatchError {
    pub fn malformed_call(reason: impl Into<String>) -> Self {
        Self::MalformedCall {
            reason: reason.into(),
        }
    }

    pub fn malformed_arguments(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Flattens the anyhow chain so the root cause survives serialization.
    pub fn invocation(tool: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: format!("{error:#}"),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::MalformedCall { .. } => ErrorCode::MalformedCall,
            DispatchError::MalformedArguments { .. } => ErrorCode::MalformedArguments,
            DispatchError::ToolNotFound { .. } => ErrorCode::ToolNotFound,
            DispatchError::Invocation { .. } => ErrorCode::InvocationFailed,
        }
    }

    /// Tool name the failure is attributed to, when one was extracted.
    pub fn tool(&self) -> Option<&str> {
        match self {
            DispatchError::MalformedCall { .. } => None,
            DispatchError::MalformedArguments { tool, .. } => Some(tool),
            DispatchError::ToolNotFound { name, .. } => Some(name),
            DispatchError::Invocation { tool, .. } => Some(tool),
        }
    }

    /// Tool label for counters. Names outside the built-in set come from
    /// callers or the model, so they all share [`UNKNOWN_TOOL`].
    pub fn metric_tool(&self) -> &str {
        match self.tool() {
            Some(name) if BUILTIN_TOOL_NAMES.contains(&name) => name,
            _ => UNKNOWN_TOOL,
        }
    }

    /// Record this failure in the global error counters
    pub fn track(&self) {
        ERROR_METRICS.record_error(&self.code(), Some(self.metric_tool()));
    }
}

/// The model reply could not be decoded into call descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not decode model reply: {reason}")]
pub struct NormalizeError {
    pub reason: String,
    /// Verbatim model text, kept for diagnostic display.
    pub raw: String,
}

impl NormalizeError {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::NormalizationFailed
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

/// Error metrics for telemetry
#[derive(Debug)]
pub struct ErrorMetrics {
    /// Total error count by error code
    error_counts: RwLock<HashMap<ErrorCode, AtomicU64>>,
    /// Error count by tool
    tool_errors: RwLock<HashMap<String, AtomicU64>>,
    /// Error count by category
    category_counts: RwLock<HashMap<String, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            error_counts: RwLock::new(HashMap::new()),
            tool_errors: RwLock::new(HashMap::new()),
            category_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Record an error occurrence
    pub fn record_error(&self, code: &ErrorCode, tool: Option<&str>) {
        increment(&self.error_counts, code, || *code);
        if let Some(tool_name) = tool {
            increment(&self.tool_errors, tool_name, || tool_name.to_string());
        }
        let category = code.category();
        increment(&self.category_counts, category, || category.to_string());

        tracing::debug!(
            error_code = %code,
            tool = tool,
            category = category,
            "error recorded"
        );
    }

    /// Get error count for a specific code
    pub fn get_error_count(&self, code: &ErrorCode) -> u64 {
        self.error_counts
            .read()
            .get(code)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get error count for a specific tool
    pub fn get_tool_error_count(&self, tool: &str) -> u64 {
        self.tool_errors
            .read()
            .get(tool)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get error count for a category
    pub fn get_category_count(&self, category: &str) -> u64 {
        self.category_counts
            .read()
            .get(category)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.error_counts.write().clear();
        self.tool_errors.write().clear();
        self.category_counts.write().clear();
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment<K, Q, F>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q, owned: F)
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
    F: FnOnce() -> K,
{
    {
        let read = map.read();
        if let Some(counter) = read.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .entry(owned())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Convert a dispatch failure into rmcp::ErrorData for the stdio transport
pub fn to_rmcp_error(error: &DispatchError) -> rmcp::ErrorData {
    let data = Some(serde_json::json!({
        "code": error.code(),
        "tool": error.tool(),
    }));
    match error {
        DispatchError::MalformedCall { .. } => {
            rmcp::ErrorData::invalid_request(error.to_string(), data)
        }
        DispatchError::MalformedArguments { .. } => {
            rmcp::ErrorData::invalid_params(error.to_string(), data)
        }
        DispatchError::ToolNotFound { .. } => rmcp::ErrorData::new(
            rmcp::model::ErrorCode::METHOD_NOT_FOUND,
            error.to_string(),
            data,
        ),
        DispatchError::Invocation { .. } => rmcp::ErrorData::internal_error(error.to_string(), data),
    }
}
