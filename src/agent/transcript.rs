use serde::Serialize;

use crate::types::{ToolCallRequest, Turn};

/// 对话记录 - 只追加，顺序即模型上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Transcript { turns: Vec::new() }
    }

    /// 追加一轮
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// 最后一轮若是模型输出，返回其中待执行的调用
    pub fn pending_calls(&self) -> &[ToolCallRequest] {
        self.last().map(Turn::pending_calls).unwrap_or(&[])
    }

    /// 从末尾向前找最近一次模型输出的文本
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(Turn::assistant_text)
    }

    /// 按顺序列出模型输出文本
    pub fn assistant_texts(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().filter_map(Turn::assistant_text)
    }

    /// 序号（仅在模型输出中从 0 计数）严格大于 watermark 的模型输出
    pub fn thoughts_after(&self, watermark: i64) -> Vec<String> {
        self.assistant_texts()
            .enumerate()
            .filter(|(ordinal, _)| *ordinal as i64 > watermark)
            .map(|(_, text)| text.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
