use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::Transcript;
use crate::error::ModelError;
use crate::types::{AssistantReply, ToolCallRequest, ToolSpec, Turn};

use super::{arguments_object, status_error, ModelClient};

pub const BACKEND: &str = "vertex";

/// Vertex AI（Gemini generateContent）配置
#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub endpoint: String,
    pub project: String,
    pub location: String,
    pub access_token: String,
    pub model: String,
    pub temperature: f32,
    pub instruction: Option<String>,
}

pub struct VertexClient {
    client: Client,
    config: VertexConfig,
}

impl VertexClient {
    pub fn new(config: VertexConfig) -> Self {
        VertexClient {
            client: Client::new(),
            config,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project,
            self.config.location,
            self.config.model
        )
    }

    /// 构造请求体：模型输出用 `model` 角色，工具结果以 functionResponse 回传
    pub fn build_request_body(&self, transcript: &Transcript, tools: &[ToolSpec]) -> Value {
        let mut contents = Vec::with_capacity(transcript.len());

        for turn in transcript {
            match turn {
                Turn::User { text } => {
                    contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
                Turn::Assistant {
                    text,
                    pending_calls,
                } => {
                    let mut parts = Vec::new();
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                    for call in pending_calls {
                        parts.push(json!({
                            "functionCall": {"name": call.name, "args": call.arguments}
                        }));
                    }
                    if parts.is_empty() {
                        parts.push(json!({"text": ""}));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                Turn::ToolOutcome { results } => {
                    if results.is_empty() {
                        continue;
                    }
                    let parts: Vec<Value> = results
                        .iter()
                        .map(|result| {
                            json!({
                                "functionResponse": {
                                    "name": result.name,
                                    "response": {"content": result.content},
                                }
                            })
                        })
                        .collect();
                    contents.push(json!({"role": "user", "parts": parts}));
                }
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {"temperature": self.config.temperature},
        });

        if let Some(instruction) = &self.config.instruction {
            body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
        }

        if !tools.is_empty() {
            let declarations: Vec<Value> = tools.iter().map(ToolSpec::to_json).collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        body
    }

    /// 解析响应，只取第一个候选；协议不带调用 id，一律合成
    pub fn parse_response(body: &Value) -> Result<AssistantReply, ModelError> {
        let candidate = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .ok_or_else(|| ModelError::Parse(format!("响应中没有 candidates：{}", body)))?;

        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut text = String::new();
        let mut pending_calls = Vec::new();

        for part in parts {
            if let Some(fragment) = part.get("text").and_then(Value::as_str) {
                text.push_str(fragment);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::Parse(format!("functionCall 缺少 name：{}", call)))?;
                let arguments = arguments_object(call.get("args").unwrap_or(&Value::Null))?;
                let id = ToolCallRequest::synthetic_id(BACKEND, pending_calls.len(), name);
                pending_calls.push(ToolCallRequest::new(id, name, arguments));
            }
        }

        Ok(AssistantReply {
            text,
            pending_calls,
        })
    }
}

/// 429 或 RESOURCE_EXHAUSTED 都算限流
fn classify_error(status: StatusCode, body: String) -> ModelError {
    let exhausted = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/status")
                .and_then(Value::as_str)
                .map(|s| s == "RESOURCE_EXHAUSTED")
        })
        .unwrap_or(false);

    if exhausted {
        ModelError::RateLimited { message: body }
    } else {
        status_error(status, body)
    }
}

#[async_trait]
impl ModelClient for VertexClient {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn generate(
        &self,
        transcript: &Transcript,
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, ModelError> {
        let body = self.build_request_body(transcript, tools);

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::Parse(format!("{}，原始内容：{}", e, text)))?;
        let reply = Self::parse_response(&value)?;
        debug!(model = %self.config.model, calls = reply.pending_calls.len(), "收到 Vertex 响应");
        Ok(reply)
    }
}
