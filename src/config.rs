use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{UnknownToolPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_ROUNDS};

/// 配置根目录 ~/.hark
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hark")
}

/// 模型协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    OpenAi,
    Vertex,
}

/// Agent 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: Backend,
    pub model: String,
    pub base_url: String,
    /// 存放 API key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_rounds: usize,
    pub unknown_tools: UnknownToolPolicy,
    pub instruction_file: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            backend: Backend::default(),
            model: std::env::var("HARK_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            base_url: std::env::var("HARK_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_rounds: DEFAULT_MAX_ROUNDS,
            unknown_tools: UnknownToolPolicy::default(),
            instruction_file: home_dir().join("INSTRUCTION.md"),
        }
    }
}

/// 限流重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: 1000,
        }
    }
}

/// Vertex AI 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConfig {
    pub project: String,
    pub location: String,
    /// 存放 access token 的环境变量名
    pub token_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for VertexConfig {
    fn default() -> Self {
        VertexConfig {
            project: std::env::var("GOOGLE_CLOUD_PROJECT").unwrap_or_default(),
            location: "us-central1".to_string(),
            token_env: "VERTEX_ACCESS_TOKEN".to_string(),
            endpoint: None,
        }
    }
}

impl VertexConfig {
    /// 未显式配置时按区域拼接
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", self.location))
    }
}

/// 日志配置，RUST_LOG 优先
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

/// 统一配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub vertex: VertexConfig,
    pub log: LogConfig,
}

impl Config {
    /// 从文件加载配置，文件不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败：{}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败：{}", path.display()))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        home_dir().join("config.toml")
    }

    /// 从默认位置加载配置
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }

    /// 读取系统指令；文件不存在或为空时返回 None
    pub fn instruction(&self) -> Result<Option<String>> {
        let path = &self.agent.instruction_file;
        if !path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("读取指令文件失败：{}", path.display()))?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
