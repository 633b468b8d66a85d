pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod tools;
pub mod types;

pub use agent::{AgentSession, Orchestrator, RetryPolicy, Transcript, UnknownToolPolicy, END_SENTINEL};
pub use cli::run_cli;
pub use config::Config;
pub use error::{AgentError, ModelError, Result, SchemaDerivationError};
pub use llm::ModelClient;
pub use tools::{HostFunction, ToolRegistry};
pub use types::{AssistantReply, Schema, ToolCallRequest, ToolCallResult, ToolSpec, Turn};
