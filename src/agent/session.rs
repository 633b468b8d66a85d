use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::types::Turn;

use super::orchestrator::Orchestrator;
use super::transcript::Transcript;

/// 收到该输入即结束会话
pub const END_SENTINEL: &str = "END";

/// 会话 - 持有一份对话记录，逐次提问并驱动调度器
pub struct AgentSession {
    id: String,
    transcript: Transcript,
    terminated: bool,
    orchestrator: Orchestrator,
}

impl AgentSession {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let id = Uuid::new_v4().to_string();
        info!(session = %id, backend = orchestrator.backend(), "会话已创建");
        AgentSession {
            id,
            transcript: Transcript::new(),
            terminated: false,
            orchestrator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// 提问一次，返回最近一次模型输出的文本
    ///
    /// 输入恰好为 [`END_SENTINEL`] 时结束会话并返回空串，不写入对话记录。
    /// 出错时已追加的轮次保留，会话仍可继续使用。
    pub async fn prompt(&mut self, text: &str) -> Result<String> {
        if self.terminated {
            return Err(AgentError::TerminatedSession);
        }

        if text == END_SENTINEL {
            self.terminate();
            return Ok(String::new());
        }

        debug!(session = %self.id, "收到用户输入");
        self.transcript.append(Turn::user(text));
        self.orchestrator.run(&mut self.transcript).await?;

        Ok(self
            .transcript
            .last_assistant_text()
            .unwrap_or_default()
            .to_string())
    }

    /// 序号大于 watermark 的模型输出；-1 返回全部
    pub fn thoughts(&self, watermark: i64) -> Vec<String> {
        self.transcript.thoughts_after(watermark)
    }

    /// 结束会话，可重复调用
    pub fn close(&mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            info!(session = %self.id, turns = self.transcript.len(), "会话已结束");
        }
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::tools::ToolRegistry;
    use crate::types::AssistantReply;
    use std::sync::Arc;

    fn session(replies: Vec<&str>) -> AgentSession {
        let steps = replies
            .into_iter()
            .map(|text| Ok(AssistantReply::text(text)))
            .collect();
        let client = ScriptedClient::new(steps);
        let registry = ToolRegistry::new(Vec::new());
        AgentSession::new(Orchestrator::new(Arc::new(client), Arc::new(registry)))
    }

    #[tokio::test]
    async fn sentinel_terminates_without_touching_the_transcript() {
        let mut session = session(vec!["hi"]);
        session.prompt("hello").await.unwrap();

        assert_eq!(session.prompt(END_SENTINEL).await.unwrap(), "");
        assert!(session.is_terminated());
        assert_eq!(session.transcript().len(), 2);

        let err = session.prompt("again").await.unwrap_err();
        assert!(matches!(err, AgentError::TerminatedSession));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut session = session(vec![]);
        session.close();
        session.close();
        assert!(session.is_terminated());
        assert!(matches!(
            session.prompt("x").await,
            Err(AgentError::TerminatedSession)
        ));
    }

    #[tokio::test]
    async fn sentinel_must_match_exactly() {
        let mut session = session(vec!["sure"]);
        assert_eq!(session.prompt("end").await.unwrap(), "sure");
        assert!(!session.is_terminated());
    }

    #[tokio::test]
    async fn thoughts_follow_assistant_ordinals() {
        let mut session = session(vec!["one", "two"]);
        session.prompt("a").await.unwrap();
        session.prompt("b").await.unwrap();

        assert_eq!(session.thoughts(-1), vec!["one", "two"]);
        assert_eq!(session.thoughts(0), vec!["two"]);
        assert!(session.thoughts(1).is_empty());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        assert_ne!(session(vec![]).id(), session(vec![]).id());
    }
}
