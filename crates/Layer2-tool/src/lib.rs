//! # warden-tool
//!
//! Tool system for Warden providing:
//! - Tool trait and registry
//! - ToolRouter: the mandatory pipeline every tool call goes through
//! - Advisory per-path locks
//! - Builtin tools (file, shell, http)

pub mod builtin;
pub mod lock;
pub mod registry;
pub mod router;
pub mod r#trait;

pub use r#trait::{collect_strings, required_str, Tool, ToolContext, ToolDef, ToolResult};
pub use registry::{RegisteredTool, ToolRegistry};
pub use router::{CallOptions, ToolRouter, ToolRouterBuilder};
pub use lock::{PathGuard, PathLocks};

// Re-export builtin tools
pub use builtin::{
    register_builtins, CreateDirTool, DeleteFileTool, HttpRequestTool, ListDirTool, MoveFileTool,
    ReadFileTool, RunCommandTool, WriteFileTool,
};
