//! Builtin tools

mod fs;
mod http;
mod shell;

pub use fs::{CreateDirTool, DeleteFileTool, ListDirTool, MoveFileTool, ReadFileTool, WriteFileTool};
pub use http::HttpRequestTool;
pub use shell::RunCommandTool;

use crate::ToolRegistry;
use std::sync::Arc;
use warden_foundation::{PermissionCategory, Result, SecurityMode};

/// Register every builtin tool with its category and visibility floor
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<()> {
    use PermissionCategory::*;
    use SecurityMode::*;

    registry.register(Arc::new(ReadFileTool), FileRead, Observer)?;
    registry.register(Arc::new(ListDirTool), FileRead, Observer)?;
    registry.register(Arc::new(WriteFileTool), FileWrite, Developer)?;
    registry.register(Arc::new(CreateDirTool), FileWrite, Developer)?;
    registry.register(Arc::new(MoveFileTool), FileWrite, Developer)?;
    registry.register(Arc::new(DeleteFileTool), FileDelete, Developer)?;
    registry.register(Arc::new(RunCommandTool), ShellExec, Developer)?;
    registry.register(Arc::new(HttpRequestTool::new()), NetworkEgress, Admin)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtins() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        assert_eq!(registry.len(), 8);

        let observer: Vec<_> = registry
            .visible_for(SecurityMode::Observer)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(observer, vec!["list_dir", "read_file"]);
        assert_eq!(registry.visible_for(SecurityMode::Admin).len(), 8);

        assert!(register_builtins(&mut registry).is_err());
    }
}
