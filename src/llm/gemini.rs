//! Gemini `generateContent` client.

use super::{ModelClient, ModelError, ModelReply, ModelRequest, api_key, http_client};
use crate::config::{ModelConfig, ProviderKind};
use crate::dispatch::{StructuredCall, ToolArguments};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

const PROVIDER: ProviderKind = ProviderKind::Gemini;
/// Keeps the key out of the request URL, which reqwest echoes in errors.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

/// Gemini ships `args` already decoded.
#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key(config)?,
            model: config.model.clone(),
        })
    }

    fn generate_endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn request_body(request: &ModelRequest) -> Value {
    let mut body = json!({
        "systemInstruction": {"parts": [{"text": request.system}]},
        "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
        "generationConfig": {"temperature": 0.0},
    });
    if !request.tools.is_empty() {
        body["tools"] = json!([{"functionDeclarations": request.tools}]);
    }
    body
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let response = self
            .client
            .post(self.generate_endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| ModelError::transport(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::transport(PROVIDER, e))?;
        if !status.is_success() {
            return Err(ModelError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: text,
            });
        }

        parse_reply(&text)
    }
}

fn parse_reply(body: &str) -> Result<ModelReply, ModelError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Parse {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
    let parts = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or_else(|| ModelError::Parse {
            provider: PROVIDER,
            message: "response has no candidate content".to_string(),
        })?;

    let mut reply = ModelReply::default();
    for part in parts {
        if let Some(text) = part.text {
            reply.text.push_str(&text);
        }
        if let Some(call) = part.function_call {
            let args = call.args.unwrap_or_else(|| json!({}));
            let arguments =
                ToolArguments::from_value(&call.name, args).map_err(|e| ModelError::Parse {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;
            reply.calls.push(StructuredCall::new(call.name, arguments));
        }
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_parts_become_decoded_calls() {
        let body = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "create_sheet", "args": {"sheet_name": "S1"}}},
                        {"functionCall": {"name": "write_cell", "args": {"sheet_name": "S1", "cell": "A1", "value": "v"}}}
                    ]
                }
            }]
        });
        let reply = parse_reply(&body.to_string()).expect("reply");
        let names = reply.calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["create_sheet", "write_cell"]);
        assert!(matches!(reply.calls[0].arguments, ToolArguments::Decoded(_)));
    }

    #[test]
    fn text_parts_are_concatenated() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "```json\n"}, {"text": "{}\n```"}]}}]
        });
        let reply = parse_reply(&body.to_string()).expect("reply");
        assert!(reply.calls.is_empty());
        assert_eq!(reply.text, "```json\n{}\n```");
    }

    #[test]
    fn tools_are_sent_as_function_declarations() {
        let request = ModelRequest {
            system: "sys".into(),
            prompt: "make a sheet".into(),
            tools: vec![json!({"name": "create_sheet"})],
        };
        let body = request_body(&request);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "create_sheet");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "make a sheet");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_endpoint_error_does_not_expose_the_key() {
        let config = ModelConfig {
            provider: ProviderKind::Gemini,
            model: "m".into(),
            api_base: "http://127.0.0.1:9".into(),
            api_key: Some("SECRETKEY123".into()),
            timeout: std::time::Duration::from_secs(5),
        };
        let client = GeminiClient::new(&config).expect("client");
        let request = ModelRequest {
            system: "sys".into(),
            prompt: "hi".into(),
            tools: Vec::new(),
        };

        let err = client.complete(&request).await.expect_err("connection refused");

        assert!(matches!(err, ModelError::Transport { .. }));
        assert!(!err.to_string().contains("SECRETKEY123"));
    }
}
