use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::llm::ModelClient;
use crate::tools::ToolRegistry;
use crate::types::{ToolCallResult, Turn};

use super::retry::RetryPolicy;
use super::transcript::Transcript;

pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    CallModel,
    ExecuteTools,
    Terminal,
}

/// 模型调用了未注册的工具时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownToolPolicy {
    /// 跳过，不产生结果
    #[default]
    Skip,
    /// 产生一条错误结果告知模型
    Report,
}

/// 单步的产出：要追加的一轮与下一个状态
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub turn: Option<Turn>,
    pub next: State,
}

/// 调度器 - 在模型调用与工具执行之间循环，直到模型不再请求工具
pub struct Orchestrator {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    retry: RetryPolicy,
    max_rounds: usize,
    unknown_tools: UnknownToolPolicy,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>) -> Self {
        Orchestrator {
            client,
            registry,
            retry: RetryPolicy::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            unknown_tools: UnknownToolPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 每次提问最多调用模型的次数
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_unknown_tools(mut self, policy: UnknownToolPolicy) -> Self {
        self.unknown_tools = policy;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &str {
        self.client.backend()
    }

    /// 从 CallModel 开始运行到 Terminal；出错时已追加的轮次保留
    pub async fn run(&self, transcript: &mut Transcript) -> Result<()> {
        let mut state = State::CallModel;
        let mut rounds = 0;

        loop {
            if state == State::CallModel {
                if rounds >= self.max_rounds {
                    warn!(rounds, "达到最大轮数，停止调用模型");
                    return Err(AgentError::TurnLimitExceeded { rounds });
                }
                rounds += 1;
            }

            let transition = self.step(state, transcript).await?;
            if let Some(turn) = transition.turn {
                transcript.append(turn);
            }
            debug!(from = ?state, to = ?transition.next, round = rounds, "状态转移");

            if transition.next == State::Terminal {
                return Ok(());
            }
            state = transition.next;
        }
    }

    /// 执行一步：只读取对话记录，返回要追加的轮次和下一状态
    pub async fn step(&self, state: State, transcript: &Transcript) -> Result<Transition> {
        match state {
            State::CallModel => self.call_model(transcript).await,
            State::ExecuteTools => self.execute_tools(transcript),
            State::Terminal => Ok(Transition {
                turn: None,
                next: State::Terminal,
            }),
        }
    }

    async fn call_model(&self, transcript: &Transcript) -> Result<Transition> {
        let specs = self.registry.specs();
        let reply = self
            .retry
            .run(|| self.client.generate(transcript, specs))
            .await?;

        let next = if reply.pending_calls.is_empty() {
            State::Terminal
        } else {
            State::ExecuteTools
        };
        debug!(
            backend = self.client.backend(),
            pending = reply.pending_calls.len(),
            "模型已回复"
        );

        Ok(Transition {
            turn: Some(Turn::from(reply)),
            next,
        })
    }

    /// 按模型给出的顺序逐个执行，不去重、不并行
    fn execute_tools(&self, transcript: &Transcript) -> Result<Transition> {
        let calls = transcript.pending_calls();
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            match self.registry.invoke(&call.name, &call.arguments) {
                Ok(content) => results.push(ToolCallResult::for_call(call, content)),
                Err(AgentError::UnknownTool { name }) => {
                    warn!(tool = %name, call_id = %call.id, "模型调用了未知工具");
                    if self.unknown_tools == UnknownToolPolicy::Report {
                        let content = json!({ "error": format!("unknown tool: {}", name) });
                        results.push(ToolCallResult::for_call(call, content));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(Transition {
            turn: Some(Turn::tool_outcome(results)),
            next: State::CallModel,
        })
    }
}
