use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// 协议未提供 id 时使用的稳定 id：后端名 + 序号 + 函数名
    pub fn synthetic_id(backend: &str, ordinal: usize, name: &str) -> String {
        format!("{}-{}-{}", backend, ordinal, name)
    }

    /// 补全缺失的 id，并保证同一批次内 id 唯一
    pub fn assign_ids(calls: &mut [ToolCallRequest], backend: &str) {
        let mut seen = HashSet::new();
        for (ordinal, call) in calls.iter_mut().enumerate() {
            if call.id.is_empty() || !seen.insert(call.id.clone()) {
                call.id = Self::synthetic_id(backend, ordinal, &call.name);
                seen.insert(call.id.clone());
            }
        }
    }
}

/// 工具执行结果，通过 `call_id` 对应一次调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub content: Value,
}

impl ToolCallResult {
    pub fn for_call(call: &ToolCallRequest, content: Value) -> Self {
        ToolCallResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
        }
    }
}

/// 对话中的一轮
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        text: String,
        pending_calls: Vec<ToolCallRequest>,
    },
    ToolOutcome {
        results: Vec<ToolCallResult>,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, pending_calls: Vec<ToolCallRequest>) -> Self {
        Turn::Assistant {
            text: text.into(),
            pending_calls,
        }
    }

    pub fn tool_outcome(results: Vec<ToolCallResult>) -> Self {
        Turn::ToolOutcome { results }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Turn::Assistant { .. })
    }

    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            Turn::Assistant { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn pending_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Assistant { pending_calls, .. } => pending_calls,
            _ => &[],
        }
    }
}

/// 模型单次生成的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    pub pending_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    pub fn text(text: impl Into<String>) -> Self {
        AssistantReply {
            text: text.into(),
            pending_calls: Vec::new(),
        }
    }
}

impl From<AssistantReply> for Turn {
    fn from(reply: AssistantReply) -> Self {
        Turn::assistant(reply.text, reply.pending_calls)
    }
}
