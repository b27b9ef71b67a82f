//! OpenAI chat-completions client.

use super::{ModelClient, ModelError, ModelReply, ModelRequest, api_key, http_client};
use crate::config::{ModelConfig, ProviderKind};
use crate::dispatch::{StructuredCall, ToolArguments};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PROVIDER: ProviderKind = ProviderKind::OpenAi;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<NativeToolCall>>,
}

#[derive(Debug, Deserialize)]
struct NativeToolCall {
    function: NativeFunction,
}

/// `arguments` arrives as JSON text and is decoded at dispatch time.
#[derive(Debug, Deserialize)]
struct NativeFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key(config)?,
            model: config.model.clone(),
        })
    }

    fn chat_completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            temperature: 0.0,
        };

        let response = self
            .client
            .post(self.chat_completions_endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::transport(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::transport(PROVIDER, e))?;
        if !status.is_success() {
            let body = serde_json::from_str::<ErrorResponse>(&text)
                .map(|err| err.error.message)
                .unwrap_or(text);
            return Err(ModelError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        parse_reply(&text)
    }
}

fn parse_reply(body: &str) -> Result<ModelReply, ModelError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Parse {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Parse {
            provider: PROVIDER,
            message: "response has no choices".to_string(),
        })?
        .message;

    let calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            StructuredCall::new(
                call.function.name,
                ToolArguments::RawText(call.function.arguments),
            )
        })
        .collect();

    Ok(ModelReply {
        text: message.content.unwrap_or_default(),
        calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_tool_calls_keep_raw_argument_text() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "create_sheet",
                            "arguments": "{\"sheet_name\":\"Finance\"}"
                        }
                    }]
                }
            }]
        });
        let reply = parse_reply(&body.to_string()).expect("reply");
        assert_eq!(reply.text, "");
        assert_eq!(
            reply.calls,
            vec![StructuredCall::new(
                "create_sheet",
                ToolArguments::RawText("{\"sheet_name\":\"Finance\"}".into())
            )]
        );
    }

    #[test]
    fn text_content_is_passed_through() {
        let body = json!({"choices": [{"message": {"content": "[{\"name\":\"write_cell\"}]"}}]});
        let reply = parse_reply(&body.to_string()).expect("reply");
        assert!(reply.calls.is_empty());
        assert_eq!(reply.text, "[{\"name\":\"write_cell\"}]");
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let err = parse_reply(r#"{"choices": []}"#).expect_err("no choices");
        assert!(matches!(err, ModelError::Parse { .. }));
    }
}
