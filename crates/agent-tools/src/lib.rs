//! Tool management and invocation framework
//!
//! Tools are the agent-callable surface of the service. Each tool carries a
//! JSON schema for its input and returns JSON output.

pub mod error;
pub mod registry;
pub mod tool;

pub use error::{Result, ToolError};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolDescriptor, parse_params};
