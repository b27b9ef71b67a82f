use super::call::{BatchReply, CallFailure, CallResult, StructuredCall};
use super::dispatcher::{Dispatcher, reject};
use crate::config::ServerConfig;
use crate::metrics::METRICS;
use crate::tools::{ToolArgs, ToolSpec, WRITE_CELL};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Argument values filled in when a model-generated call leaves them out.
///
/// A default only lands on a tool that declares the parameter, and never
/// replaces a key the call already carries (even a `null` one).
#[derive(Debug, Clone, Default)]
pub struct DefaultArguments {
    global: ToolArgs,
    per_tool: HashMap<String, ToolArgs>,
}

impl DefaultArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// `filepath` for every tool, `sheet_name` for `write_cell`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new()
            .with_global(
                "filepath",
                Value::String(config.default_workbook.to_string_lossy().into_owned()),
            )
            .with_tool_default(
                WRITE_CELL,
                "sheet_name",
                Value::String(config.default_sheet.clone()),
            )
    }

    pub fn with_global(mut self, key: impl Into<String>, value: Value) -> Self {
        self.global.insert(key.into(), value);
        self
    }

    pub fn with_tool_default(
        mut self,
        tool: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.per_tool
            .entry(tool.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Fills missing keys on `args`; returns the keys that were injected.
    pub fn apply(&self, spec: &ToolSpec, args: &mut ToolArgs) -> Vec<String> {
        let tool_defaults = self.per_tool.get(spec.name);
        let mut injected = Vec::new();

        // Tool-specific values win over global ones.
        for defaults in tool_defaults.into_iter().chain(std::iter::once(&self.global)) {
            for (key, value) in defaults {
                if spec.declares(key) && !args.contains_key(key) {
                    args.insert(key.clone(), value.clone());
                    injected.push(key.clone());
                }
            }
        }
        injected
    }
}

/// Runs every call of a batch in order, collecting one result per call.
///
/// A failing call never stops the rest of the batch.
pub async fn run_batch(
    dispatcher: &Dispatcher,
    batch: BatchReply,
    defaults: &DefaultArguments,
) -> Vec<CallResult> {
    METRICS.record_batch(batch.len());
    tracing::debug!(calls = batch.len(), "running batch");

    let mut results = Vec::with_capacity(batch.len());
    for (index, description) in batch.into_iter().enumerate() {
        let result = run_one(dispatcher, &description, defaults).await;
        if let CallResult::Failure(failure) = &result {
            tracing::debug!(index, error = %failure.error, "batch call failed");
        }
        results.push(result);
    }
    results
}

async fn run_one(
    dispatcher: &Dispatcher,
    description: &Value,
    defaults: &DefaultArguments,
) -> CallResult {
    let call = match StructuredCall::from_value(description) {
        Ok(call) => call,
        Err(error) => return failure(reject(error)),
    };
    let StructuredCall { name, arguments } = call;
    let mut args = match arguments.into_map(&name) {
        Ok(args) => args,
        Err(error) => return failure(reject(error)),
    };

    if let Some(spec) = dispatcher.registry().lookup(&name) {
        let injected = defaults.apply(spec, &mut args);
        if !injected.is_empty() {
            tracing::debug!(tool = spec.name, ?injected, "applied default arguments");
        }
    }

    dispatcher
        .dispatch(StructuredCall::decoded(name, args))
        .await
        .into()
}

fn failure(error: crate::error::DispatchError) -> CallResult {
    CallResult::Failure(CallFailure::from(&error))
}

/// A dispatcher paired with the defaults applied to every batch it runs.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    dispatcher: Arc<Dispatcher>,
    defaults: DefaultArguments,
}

impl BatchCoordinator {
    pub fn new(dispatcher: Arc<Dispatcher>, defaults: DefaultArguments) -> Self {
        Self {
            dispatcher,
            defaults,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn defaults(&self) -> &DefaultArguments {
        &self.defaults
    }

    pub async fn run(&self, batch: BatchReply) -> Vec<CallResult> {
        run_batch(&self.dispatcher, batch, &self.defaults).await
    }
}
