mod schema;
mod turn;

pub use schema::{Primitive, Schema, ToolSpec};
pub use turn::{AssistantReply, ToolCallRequest, ToolCallResult, Turn};
