//! `/chat` orchestration: prompt, model, normalization, batch dispatch.

use crate::dispatch::CallResult;
use crate::error::{ERROR_METRICS, ErrorCode, NormalizeError};
use crate::llm::{ModelError, prompt};
use crate::logging::chat_request_span;
use crate::metrics::METRICS;
use crate::state::AppState;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub results: Vec<CallResult>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("no model provider is configured")]
    ModelUnavailable,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::EmptyPrompt => ErrorCode::InvalidParams,
            ChatError::ModelUnavailable => ErrorCode::ModelUnavailable,
            ChatError::Model(error) => error.code(),
            ChatError::Normalize(error) => error.code(),
        }
    }

    /// Verbatim model text, when the failure came from decoding it.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ChatError::Normalize(error) => Some(&error.raw),
            _ => None,
        }
    }
}

/// Sends `prompt` to the configured model and runs every call it returns.
///
/// Individual call failures are reported inside the results; only a
/// missing model, a provider failure or an undecodable reply fail the
/// whole request.
pub async fn run_chat(state: &AppState, prompt_text: &str) -> Result<ChatOutcome, ChatError> {
    let config = state.config();
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = chat_request_span(&request_id, &config.model.provider.to_string());

    async move {
        let outcome = chat(state, prompt_text).await;
        if let Err(error) = &outcome {
            ERROR_METRICS.record_error(&error.code(), None);
            tracing::warn!(code = %error.code(), error = %error, "chat request failed");
        }
        outcome
    }
    .instrument(span)
    .await
}

async fn chat(state: &AppState, prompt_text: &str) -> Result<ChatOutcome, ChatError> {
    let prompt_text = prompt_text.trim();
    if prompt_text.is_empty() {
        return Err(ChatError::EmptyPrompt);
    }
    let model = state.model().ok_or(ChatError::ModelUnavailable)?;
    let config = state.config();

    let request = prompt::build_request(state.registry(), config.model.provider, prompt_text);
    let start = Instant::now();
    let reply = model.complete(&request).await;
    METRICS.record_model_request(model.provider(), reply.is_ok(), start.elapsed());
    let reply = reply?;
    tracing::debug!(
        native_calls = reply.calls.len(),
        text_len = reply.text.len(),
        "model replied"
    );

    let batch = reply.into_batch()?;
    let results = state.batch().run(batch).await;
    tracing::info!(
        calls = results.len(),
        succeeded = results.iter().filter(|r| r.is_success()).count(),
        "chat request completed"
    );
    Ok(ChatOutcome { results })
}
