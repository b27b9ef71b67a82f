use crate::config::ServerConfig;
use crate::dispatch::{BatchCoordinator, DefaultArguments, Dispatcher};
use crate::llm::{self, ModelClient};
use crate::tools::{ToolContext, ToolRegistry};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything a request handler needs, built once at startup.
///
/// Nothing here is mutated after construction; workbooks are read from disk
/// on every call.
pub struct AppState {
    config: Arc<ServerConfig>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    batch: BatchCoordinator,
    model: Option<Arc<dyn ModelClient>>,
}

impl AppState {
    /// Builds the state and the configured model client, if any.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        let model = llm::build_client(&config.model).context("failed to build model client")?;
        if model.is_none() {
            tracing::info!(
                provider = %config.model.provider,
                "no model provider configured"
            );
        }
        Ok(Self::with_model(config, model))
    }

    pub fn with_model(config: Arc<ServerConfig>, model: Option<Arc<dyn ModelClient>>) -> Self {
        let registry = Arc::new(ToolRegistry::from_config(&config));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            ToolContext::from_config(&config),
        ));
        let batch = BatchCoordinator::new(
            Arc::clone(&dispatcher),
            DefaultArguments::from_config(&config),
        );
        Self {
            config,
            registry,
            dispatcher,
            batch,
            model,
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    pub fn model(&self) -> Option<Arc<dyn ModelClient>> {
        self.model.clone()
    }
}
