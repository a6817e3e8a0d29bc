//! Tool trait and related types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_foundation::{Error, Result, RiskSubject, WorkspaceBoundary};

/// Definition of a tool exposed to the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for parameters
    pub parameters: ToolParameters,
}

/// Parameters schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,

    pub properties: Value,

    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolDef {
    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> ToolDefBuilder {
        ToolDefBuilder::new(name, description)
    }
}

/// Builder for ToolDef
pub struct ToolDefBuilder {
    name: String,
    description: String,
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl ToolDefBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            properties: serde_json::Map::new(),
            required: vec![],
        }
    }

    fn param(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn string_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({ "type": "string", "description": description.into() });
        self.param(name, schema, required)
    }

    pub fn integer_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({ "type": "integer", "description": description.into() });
        self.param(name, schema, required)
    }

    pub fn boolean_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({ "type": "boolean", "description": description.into() });
        self.param(name, schema, required)
    }

    pub fn object_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({ "type": "object", "description": description.into() });
        self.param(name, schema, required)
    }

    pub fn enum_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: Vec<&str>,
        required: bool,
    ) -> Self {
        let schema = serde_json::json!({
            "type": "string",
            "description": description.into(),
            "enum": values
        });
        self.param(name, schema, required)
    }

    pub fn build(self) -> ToolDef {
        ToolDef {
            name: self.name,
            description: self.description,
            parameters: ToolParameters {
                schema_type: "object".to_string(),
                properties: Value::Object(self.properties),
                required: self.required,
            },
        }
    }
}

/// Context handed to a tool for one call
#[derive(Clone)]
pub struct ToolContext {
    /// Owning task, if the call comes from the task pipeline
    pub task_id: Option<String>,

    /// Root every file operation must stay inside
    pub workspace: Arc<WorkspaceBoundary>,

    /// Cancelled when the task is cancelled or the kill switch fires
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(workspace: Arc<WorkspaceBoundary>, cancel: CancellationToken) -> Self {
        Self {
            task_id: None,
            workspace,
            cancel,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Resolve a path argument against the workspace, rejecting escapes
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        self.workspace.resolve(path).ok_or_else(|| {
            Error::security_blocked(
                "workspace",
                format!("path escapes workspace root: {}", path),
            )
        })
    }
}

/// Result of tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Text output (scanned by the output gate)
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            metadata: None,
            error: None,
        }
    }

    pub fn success_with_metadata(content: impl Into<String>, metadata: Value) -> Self {
        Self {
            success: true,
            content: content.into(),
            metadata: Some(metadata),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            metadata: None,
            error: Some(message.into()),
        }
    }
}

/// Tool trait - implement this to create a new tool
///
/// Handlers never check permissions themselves; every call goes through
/// [`crate::ToolRouter`], which screens the arguments, scores the risk and
/// asks for approval before `execute` runs.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;

    fn name(&self) -> String {
        self.definition().name
    }

    /// What the risk analyzer should look at for these arguments
    fn risk_subject(&self, _args: &Value) -> RiskSubject {
        RiskSubject::None
    }

    /// Text screened by the input gate
    fn scan_text(&self, args: &Value) -> String {
        collect_strings(args)
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult>;
}

/// All string values in `args`, one per line
pub fn collect_strings(args: &Value) -> String {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(args, &mut out);
    out.join("\n")
}

/// Required string argument
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput(format!("missing string argument '{}'", key)))
}
