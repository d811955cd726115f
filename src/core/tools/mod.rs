pub mod tool_call;
pub mod tool_catalog;

pub use tool_call::ToolCall;
pub use tool_catalog::{InvalidRequest, ToolDescriptor, ToolName, ToolRegistry};
