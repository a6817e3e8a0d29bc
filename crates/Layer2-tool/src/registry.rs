//! Tool Registry - tool name to handler binding

use crate::{Tool, ToolDef};
use std::collections::HashMap;
use std::sync::Arc;
use warden_foundation::{Error, PermissionCategory, Result, SecurityMode};

/// A registered tool with its permission category and visibility floor
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub category: PermissionCategory,
    /// Lowest SecurityMode in which the tool is visible at all
    pub min_mode: SecurityMode,
}

impl RegisteredTool {
    pub fn visible_in(&self, mode: SecurityMode) -> bool {
        mode >= self.min_mode
    }
}

/// Registry of available tools
///
/// Constructed once and handed to the router; there is no global registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    disabled: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(
        &mut self,
        tool: Arc<dyn Tool>,
        category: PermissionCategory,
        min_mode: SecurityMode,
    ) -> Result<()> {
        let name = tool.name();
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                category,
                min_mode,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<RegisteredTool> {
        self.disabled.retain(|n| n != name);
        self.tools.remove(name)
    }

    /// Disable a tool (keeps it registered but hides it in every mode)
    pub fn disable(&mut self, name: &str) {
        if !self.disabled.iter().any(|n| n == name) {
            self.disabled.push(name.to_string());
        }
    }

    pub fn enable(&mut self, name: &str) {
        self.disabled.retain(|n| n != name);
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|n| n == name)
    }

    /// Any registered tool, regardless of mode
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool visible in `mode`; unregistered, disabled and below-mode tools all read as missing
    pub fn lookup(&self, name: &str, mode: SecurityMode) -> Result<RegisteredTool> {
        self.tools
            .get(name)
            .filter(|t| !self.is_disabled(name) && t.visible_in(mode))
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Definitions of the tools visible in `mode`, sorted by name
    pub fn visible_for(&self, mode: SecurityMode) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .iter()
            .filter(|(name, t)| !self.is_disabled(name) && t.visible_in(mode))
            .map(|(_, t)| t.tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolContext, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn definition(&self) -> ToolDef {
            ToolDef::builder(self.0, "test tool").build()
        }

        async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolResult> {
            Ok(ToolResult::success("ok"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Named("peek")), PermissionCategory::FileRead, SecurityMode::Observer)
            .unwrap();
        registry
            .register(Arc::new(Named("fetch")), PermissionCategory::NetworkEgress, SecurityMode::Admin)
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(Named("peek")), PermissionCategory::FileRead, SecurityMode::Observer)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_mode_visibility() {
        let registry = registry();

        assert!(registry.lookup("peek", SecurityMode::Observer).is_ok());
        assert!(matches!(
            registry.lookup("fetch", SecurityMode::Developer),
            Err(Error::ToolNotFound(_))
        ));
        assert!(registry.lookup("fetch", SecurityMode::Admin).is_ok());
        assert!(matches!(
            registry.lookup("missing", SecurityMode::Admin),
            Err(Error::ToolNotFound(_))
        ));

        let names: Vec<_> = registry
            .visible_for(SecurityMode::Developer)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["peek".to_string()]);
    }

    #[test]
    fn test_disable_hides_tool() {
        let mut registry = registry();
        registry.disable("peek");
        assert!(registry.lookup("peek", SecurityMode::Admin).is_err());
        assert!(registry.get("peek").is_some());

        registry.enable("peek");
        assert!(registry.lookup("peek", SecurityMode::Observer).is_ok());
    }
}
