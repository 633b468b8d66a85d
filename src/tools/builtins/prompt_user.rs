use anyhow::Result;
use schemars::JsonSchema;
use serde::Deserialize;

/// Ask the human user a question and wait for their next message.
/// Send the question as `prompt` (`q` or `text` are accepted too).
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct PromptUserRequest {
    pub prompt: Option<String>,
    pub q: Option<String>,
    pub text: Option<String>,
}

impl PromptUserRequest {
    /// 依次取 prompt、q、text 中第一个非空的值
    pub fn resolved_text(&self) -> &str {
        [&self.prompt, &self.q, &self.text]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

/// 通知外层应用向用户提问，返回确认信息让模型在下一条用户消息后继续
pub fn prompt_user(request: PromptUserRequest) -> Result<String> {
    Ok(format!("Awaiting user response: {}", request.resolved_text()))
}
