//! 模型后端。调度器只依赖 [`ModelClient`]，每种协议一个实现。

pub mod openai;
pub mod vertex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::agent::Transcript;
use crate::config::{Backend, Config};
use crate::error::ModelError;
use crate::types::{AssistantReply, ToolSpec};

pub use openai::{OpenAiChatClient, OpenAiConfig};
pub use vertex::{VertexClient, VertexConfig};

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 后端名，用于日志与合成调用 id
    fn backend(&self) -> &str;

    /// 根据对话记录与可用工具生成下一轮模型输出；限流必须返回 `ModelError::RateLimited`
    async fn generate(
        &self,
        transcript: &Transcript,
        tools: &[ToolSpec],
    ) -> std::result::Result<AssistantReply, ModelError>;
}

/// 按配置创建模型客户端
pub fn from_config(config: &Config) -> Result<Arc<dyn ModelClient>> {
    let instruction = config.instruction()?;

    match config.agent.backend {
        Backend::OpenAi => {
            let api_key = std::env::var(&config.agent.api_key_env).ok();
            Ok(Arc::new(OpenAiChatClient::new(OpenAiConfig {
                base_url: config.agent.base_url.clone(),
                api_key,
                model: config.agent.model.clone(),
                temperature: config.agent.temperature,
                instruction,
            })))
        }
        Backend::Vertex => {
            if config.vertex.project.is_empty() {
                return Err(ModelError::Config("vertex.project 未设置".to_string()).into());
            }
            let access_token = std::env::var(&config.vertex.token_env)
                .with_context(|| format!("{} 环境变量未设置", config.vertex.token_env))?;
            Ok(Arc::new(VertexClient::new(VertexConfig {
                endpoint: config.vertex.endpoint(),
                project: config.vertex.project.clone(),
                location: config.vertex.location.clone(),
                access_token,
                model: config.agent.model.clone(),
                temperature: config.agent.temperature,
                instruction,
            })))
        }
    }
}

/// 非成功响应分类：429 视为限流
pub(crate) fn status_error(status: StatusCode, body: String) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimited { message: body }
    } else {
        ModelError::Http {
            status: status.as_u16(),
            body,
        }
    }
}

/// 工具参数：对象原样使用，JSON 字符串先解析，空值视为空表
pub(crate) fn arguments_object(raw: &Value) -> std::result::Result<Map<String, Value>, ModelError> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ModelError::Parse(format!("工具参数不是对象：{}", other))),
            Err(e) => Err(ModelError::Parse(format!("工具参数解析失败：{}", e))),
        },
        other => Err(ModelError::Parse(format!("工具参数不是对象：{}", other))),
    }
}
