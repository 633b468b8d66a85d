use anyhow::{Context, Result};
use std::sync::Arc;

use reedline::{DefaultCompleter, DefaultHinter, DefaultPrompt, Reedline, Signal};

use crate::agent::{AgentSession, Orchestrator, RetryPolicy, END_SENTINEL};
use crate::config::Config;
use crate::llm;
use crate::tools::builtins::default_functions;
use crate::tools::ToolRegistry;

const DEFAULT_INSTRUCTION: &str = "You are a helpful assistant. Use the available tools when they help answer the question. If you need more information from the user, call prompt_user.\n";

/// 打印帮助信息
fn print_help() {
    println!("🤖 hark - 工具调用对话助手");
    println!();
    println!("用法：hark <命令>");
    println!();
    println!("命令:");
    println!("  chat            进入交互模式（默认）");
    println!("  tools           打印提供给模型的工具 schema");
    println!("  onboard         初始化配置");
    println!("  help            显示此帮助信息");
    println!();
    print_chat_help();
    println!("示例:");
    println!("  hark                # 开始对话");
    println!("  hark tools          # 查看工具列表");
}

fn print_chat_help() {
    println!("交互模式命令:");
    println!("  /thoughts   - 显示上次查看之后的模型输出");
    println!("  /transcript - 以 JSON 打印完整对话记录");
    println!("  /quit       - 结束会话并退出");
    println!();
}

/// 组装内置工具注册表
pub fn build_registry() -> ToolRegistry {
    ToolRegistry::new(default_functions())
}

/// 按配置组装调度器
pub fn build_orchestrator(config: &Config, registry: Arc<ToolRegistry>) -> Result<Orchestrator> {
    let client = llm::from_config(config).context("创建模型客户端失败")?;

    Ok(Orchestrator::new(client, registry)
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_max_rounds(config.agent.max_rounds)
        .with_unknown_tools(config.agent.unknown_tools))
}

/// Onboard 命令 - 写入默认配置与指令文件
fn run_onboard() -> Result<()> {
    println!("🚀 初始化 hark 配置...\n");

    let config = Config::default();
    let config_path = Config::default_path();

    config.save(&config_path).context("保存配置文件失败")?;
    println!("✅ 保存配置：{}", config_path.display());

    let instruction_path = &config.agent.instruction_file;
    if instruction_path.exists() {
        println!("⏭️  已存在：{}", instruction_path.display());
    } else {
        if let Some(parent) = instruction_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(instruction_path, DEFAULT_INSTRUCTION)
            .with_context(|| format!("写入指令文件失败：{}", instruction_path.display()))?;
        println!("✅ 创建：{}", instruction_path.display());
    }
    println!();

    println!("🎉 初始化完成！");
    println!();
    println!("你可以:");
    println!("  1. 编辑 {} 设置模型与后端", config_path.display());
    println!("  2. 设置 {} 环境变量", config.agent.api_key_env);
    println!("  3. 运行 'hark chat' 开始对话");

    Ok(())
}

/// Tools 命令 - 打印工具 schema
fn run_tools() -> Result<()> {
    let registry = build_registry();

    let specs: Vec<serde_json::Value> = registry.specs().iter().map(|spec| spec.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&specs)?);

    for err in registry.rejected() {
        eprintln!("⚠️  {}", err);
    }

    Ok(())
}

/// 交互输入的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    /// 打印后继续读取输入
    Print(String),
    /// 结束对话
    Quit,
}

/// 交互对话状态：会话与 /thoughts 的已读位置
pub struct ChatState {
    session: AgentSession,
    /// 已经通过 /thoughts 显示过的模型输出序号
    watermark: i64,
}

impl ChatState {
    pub fn new(session: AgentSession) -> Self {
        ChatState {
            session,
            watermark: -1,
        }
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    /// 处理一行输入
    pub async fn handle(&mut self, input: &str) -> Result<ChatAction> {
        if input.starts_with('/') {
            let action = match input.to_lowercase().as_str() {
                "/quit" | "/exit" => ChatAction::Quit,
                "/thoughts" => ChatAction::Print(self.unread_thoughts()),
                "/transcript" => ChatAction::Print(format!(
                    "{}\n",
                    serde_json::to_string_pretty(self.session.transcript())?
                )),
                "/help" | "/h" => {
                    print_chat_help();
                    ChatAction::Print(String::new())
                }
                _ => ChatAction::Print(format!("❌ 未知命令：{}\n输入 /help 查看帮助\n", input)),
            };
            return Ok(action);
        }

        let action = match self.session.prompt(input).await {
            Ok(_) if self.session.is_terminated() => ChatAction::Quit,
            Ok(reply) => ChatAction::Print(format!("🤖 {}\n", reply)),
            Err(e) => ChatAction::Print(format!("❌ 错误：{}\n", e)),
        };
        Ok(action)
    }

    /// 上次 /thoughts 之后的模型输出，并推进已读位置
    fn unread_thoughts(&mut self) -> String {
        let thoughts = self.session.thoughts(self.watermark);
        if thoughts.is_empty() {
            return "(没有新的输出)\n".to_string();
        }

        let mut out = String::new();
        for thought in thoughts {
            self.watermark += 1;
            out.push_str(&format!("💭 [{}] {}\n", self.watermark, thought));
        }
        out
    }

    /// 结束会话；会话可能已被 END 输入终止
    pub fn finish(&mut self) {
        self.session.close();
    }
}

/// Chat 命令 - 交互式对话
async fn run_chat() -> Result<()> {
    let config = Config::load_default()?;
    let registry = Arc::new(build_registry());
    let orchestrator = build_orchestrator(&config, registry.clone())?;

    println!("🤖 hark ({} / {})", orchestrator.backend(), config.agent.model);
    let names: Vec<&str> = registry.specs().iter().map(|spec| spec.name.as_str()).collect();
    println!("可用工具：{}", names.join(", "));
    println!("输入 /quit 或 {} 退出，/help 查看帮助\n", END_SENTINEL);

    let mut chat = ChatState::new(AgentSession::new(orchestrator));
    println!("📝 当前会话：{}\n", chat.session().id());

    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(DefaultHinter::default()))
        .with_completer(Box::new(DefaultCompleter::default()));
    let prompt = DefaultPrompt::default();

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();

                if input.is_empty() {
                    continue;
                }

                match chat.handle(input).await? {
                    ChatAction::Print(text) => {
                        if !text.is_empty() {
                            println!("{}", text);
                        }
                    }
                    ChatAction::Quit => break,
                }
            }
            Signal::CtrlD => break,
            Signal::CtrlC => {
                println!("\n输入 /quit 退出，或继续输入问题");
            }
        }
    }

    chat.finish();
    println!("👋 再见！");
    Ok(())
}

/// 主入口函数
pub async fn run_cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let command = args
        .get(1)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "chat".to_string());

    match command.as_str() {
        "chat" | "c" => run_chat().await,
        "tools" | "t" => run_tools(),
        "onboard" => run_onboard(),
        "help" | "-h" | "--help" | "h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("❌ 未知命令：{}", command);
            eprintln!();
            eprintln!("运行 'hark help' 查看帮助信息");
            std::process::exit(1);
        }
    }
}
