use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

use crate::agent::Transcript;
use crate::error::ModelError;
use crate::types::{AssistantReply, ToolCallRequest, ToolSpec, Turn};

use super::{arguments_object, status_error, ModelClient};

pub const BACKEND: &str = "openai";

/// OpenAI 兼容接口配置（也适用于 Ollama、Groq 等兼容服务）
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub instruction: Option<String>,
}

pub struct OpenAiChatClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChatClient {
    pub fn new(config: OpenAiConfig) -> Self {
        OpenAiChatClient {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// 构造请求体。没有对应 tool 消息的调用不会出现在 tool_calls 中
    pub fn build_request_body(&self, transcript: &Transcript, tools: &[ToolSpec]) -> Value {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        let answered: HashSet<&str> = transcript
            .turns()
            .iter()
            .filter_map(|turn| match turn {
                Turn::ToolOutcome { results } => Some(results),
                _ => None,
            })
            .flatten()
            .map(|result| result.call_id.as_str())
            .collect();

        if let Some(instruction) = &self.config.instruction {
            messages.push(json!({"role": "system", "content": instruction}));
        }

        for turn in transcript {
            match turn {
                Turn::User { text } => messages.push(json!({"role": "user", "content": text})),
                Turn::Assistant {
                    text,
                    pending_calls,
                } => {
                    let mut message = json!({"role": "assistant", "content": text});
                    let calls: Vec<Value> = pending_calls
                        .iter()
                        .filter(|call| answered.contains(call.id.as_str()))
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": Value::Object(call.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect();
                    if !calls.is_empty() {
                        message["tool_calls"] = Value::Array(calls);
                        if text.is_empty() {
                            message["content"] = Value::Null;
                        }
                    }
                    messages.push(message);
                }
                Turn::ToolOutcome { results } => {
                    for result in results {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "name": result.name,
                            "content": content_text(&result.content),
                        }));
                    }
                }
            }
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": false,
        });

        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|spec| json!({"type": "function", "function": spec.to_json()}))
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }

    /// 解析响应，只取第一个 choice
    pub fn parse_response(body: &Value) -> Result<AssistantReply, ModelError> {
        let message = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| ModelError::Parse(format!("响应中没有 choices：{}", body)))?;

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut pending_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let function = call.get("function").unwrap_or(&Value::Null);
                let name = function
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::Parse(format!("工具调用缺少 name：{}", call)))?;
                let arguments = arguments_object(function.get("arguments").unwrap_or(&Value::Null))?;
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                pending_calls.push(ToolCallRequest::new(id, name, arguments));
            }
        }
        ToolCallRequest::assign_ids(&mut pending_calls, BACKEND);

        Ok(AssistantReply {
            text,
            pending_calls,
        })
    }
}

/// 字符串结果原样发送，其他结果序列化为 JSON 文本
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ModelClient for OpenAiChatClient {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn generate(
        &self,
        transcript: &Transcript,
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, ModelError> {
        let body = self.build_request_body(transcript, tools);

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::Parse(format!("{}，原始内容：{}", e, text)))?;
        let reply = Self::parse_response(&value)?;
        debug!(model = %self.config.model, calls = reply.pending_calls.len(), "收到 OpenAI 响应");
        Ok(reply)
    }
}
