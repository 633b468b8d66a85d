pub mod builtins;
pub mod registry;
pub mod schema;

pub use registry::{HostFunction, ToolRegistry};
pub use schema::ParamKind;
