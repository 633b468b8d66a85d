use thiserror::Error;

/// 工具签名无法生成 schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDerivationError {
    #[error("工具名称不合法：{name:?}（只允许 1-64 个字母、数字、下划线或连字符）")]
    InvalidName { name: String },
    #[error("{name} 必须只接收一个参数，实际为 {found} 个")]
    Arity { name: String, found: usize },
    #[error("工具名称重复：{name}")]
    DuplicateName { name: String },
}

/// 模型后端错误
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("模型服务限流：{message}")]
    RateLimited { message: String },
    #[error("模型服务错误：{status} - {body}")]
    Http { status: u16, body: String },
    #[error("调用模型服务失败：{0}")]
    Transport(#[from] reqwest::Error),
    #[error("解析模型响应失败：{0}")]
    Parse(String),
    #[error("模型配置错误：{0}")]
    Config(String),
}

impl ModelError {
    /// 只有限流可以重试
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    SchemaDerivation(#[from] SchemaDerivationError),
    #[error("未知工具：{name}")]
    UnknownTool { name: String },
    #[error("工具 {name} 执行失败：{message}")]
    ToolInvocation { name: String, message: String },
    #[error("模型服务在 {attempts} 次尝试后仍然限流：{last}")]
    RateLimitExceeded {
        attempts: u32,
        #[source]
        last: ModelError,
    },
    #[error("会话已终止")]
    TerminatedSession,
    #[error("单次提问超过最大轮数：{rounds}")]
    TurnLimitExceeded { rounds: usize },
    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
