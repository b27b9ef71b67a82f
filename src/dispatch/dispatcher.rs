use super::call::StructuredCall;
use crate::error::DispatchError;
use crate::log_tool_call;
use crate::logging::tool_call_span;
use crate::metrics::METRICS;
use crate::tools::{ToolArgs, ToolContext, ToolRegistry, ToolResponse, ToolSpec};
use anyhow::anyhow;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Resolves structured calls against the registry and runs them.
///
/// Handlers touch the filesystem, so each invocation runs on the blocking
/// pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, context: ToolContext) -> Self {
        Self {
            registry,
            context: Arc::new(context),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Extracts a call from a raw description and dispatches it.
    pub async fn dispatch_value(&self, description: &Value) -> Result<ToolArgs, DispatchError> {
        let call = StructuredCall::from_value(description).map_err(reject)?;
        self.dispatch(call).await
    }

    /// Decodes arguments, resolves the tool by name and invokes it.
    ///
    /// Nothing is invoked unless both steps succeed.
    pub async fn dispatch(&self, call: StructuredCall) -> Result<ToolArgs, DispatchError> {
        let span = tool_call_span(&call.name);
        async move {
            let StructuredCall { name, arguments } = call;
            let args = arguments.into_map(&name).map_err(reject)?;
            let spec = self.resolve(&name).map_err(reject)?;
            self.invoke(spec, args).await
        }
        .instrument(span)
        .await
    }

    pub fn resolve(&self, name: &str) -> Result<ToolSpec, DispatchError> {
        self.registry
            .lookup(name)
            .copied()
            .ok_or_else(|| DispatchError::ToolNotFound {
                name: name.trim().to_string(),
                available: self.registry.names(),
            })
    }

    async fn invoke(&self, spec: ToolSpec, args: ToolArgs) -> Result<ToolArgs, DispatchError> {
        let context = Arc::clone(&self.context);
        let handler = spec.handler;
        let start = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || handler(&context, args))
            .await
            .map_err(|join| anyhow!("tool task failed: {join}"))
            .and_then(|result| result)
            .and_then(into_result_map);
        let elapsed = start.elapsed();

        match outcome {
            Ok(result) => {
                METRICS.record_tool_success(spec.name, elapsed);
                log_tool_call!(spec.name, "success", elapsed, "tool call finished");
                Ok(result)
            }
            Err(error) => {
                let error = DispatchError::invocation(spec.name, &error);
                error.track();
                METRICS.record_tool_error(spec.name, elapsed, error.code().category());
                log_tool_call!(spec.name, "error", elapsed, error = %error, "tool call failed");
                Err(error)
            }
        }
    }
}

/// Logs and counts a failure that stopped a call before any handler ran.
pub(crate) fn reject(error: DispatchError) -> DispatchError {
    error.track();
    METRICS.record_dispatch_error(error.metric_tool(), error.code().category());
    tracing::warn!(code = %error.code(), tool = error.tool(), error = %error, "tool call rejected");
    error
}

fn into_result_map(response: ToolResponse) -> anyhow::Result<ToolArgs> {
    match serde_json::to_value(response)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("tool response serialized to {other}, expected an object")),
    }
}
