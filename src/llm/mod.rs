//! Model provider clients.
//!
//! Each provider adapter maps its native reply into [`ModelReply`]: native
//! function calls become canonical [`StructuredCall`]s, anything else is
//! left as text for the normalizer.

pub mod gemini;
pub mod openai;
pub mod prompt;

use crate::config::{ModelConfig, ProviderKind};
use crate::dispatch::{BatchReply, StructuredCall, normalize};
use crate::error::{ErrorCode, NormalizeError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Provider-side failure of one completion request.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key configured for {provider}; set {env}")]
    MissingApiKey {
        provider: ProviderKind,
        env: &'static str,
    },

    #[error("request to {provider} failed: {message}")]
    Transport {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("could not parse {provider} response: {message}")]
    Parse {
        provider: ProviderKind,
        message: String,
    },
}

impl ModelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::MissingApiKey { .. } => ErrorCode::ModelUnavailable,
            _ => ErrorCode::ModelRequestFailed,
        }
    }

    pub(crate) fn transport(provider: ProviderKind, error: reqwest::Error) -> Self {
        let error = error.without_url();
        let message = if error.is_timeout() {
            format!("timed out: {error}")
        } else {
            error.to_string()
        };
        Self::Transport { provider, message }
    }
}

/// One completion request: fixed system instruction, user prompt and the
/// provider-specific tool declarations.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
    pub tools: Vec<Value>,
}

/// What the provider answered: free text, native function calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub calls: Vec<StructuredCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: Vec::new(),
        }
    }

    /// Native calls win; otherwise the text is normalized.
    pub fn into_batch(self) -> Result<BatchReply, NormalizeError> {
        if self.calls.is_empty() {
            normalize(&self.text)
        } else {
            Ok(BatchReply::from_calls(self.calls))
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync + std::fmt::Debug {
    /// Provider label used in logs and metrics.
    fn provider(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

/// Builds the configured provider client, or `None` when no key is set.
pub fn build_client(config: &ModelConfig) -> Result<Option<Arc<dyn ModelClient>>, ModelError> {
    if !config.is_configured() {
        return Ok(None);
    }
    let client: Arc<dyn ModelClient> = match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(config)?),
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config)?),
    };
    Ok(Some(client))
}

pub(crate) fn http_client(config: &ModelConfig) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| ModelError::transport(config.provider, e))
}

pub(crate) fn api_key(config: &ModelConfig) -> Result<String, ModelError> {
    config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or(ModelError::MissingApiKey {
            provider: config.provider,
            env: config.provider.api_key_env(),
        })
}
