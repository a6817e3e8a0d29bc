//! Executor that sends every subtask through the ToolRouter

use super::SubtaskExecutor;
use crate::task::{Subtask, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_foundation::{AuditKind, AuditQuery, AuditRecord, Error, Result, ThreatLevel};
use warden_tool::{CallOptions, ToolRouter};

pub struct RouterExecutor {
    router: Arc<ToolRouter>,
}

impl RouterExecutor {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<ToolRouter> {
        &self.router
    }
}

#[async_trait]
impl SubtaskExecutor for RouterExecutor {
    async fn execute(
        &self,
        task_id: TaskId,
        subtask: &Subtask,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let opts = CallOptions::for_task(task_id.to_string(), cancel.clone());
        let result = self
            .router
            .call_with(&subtask.tool, subtask.args.clone(), opts)
            .await?;

        // The router already turns success=false into an error
        if !result.success {
            return Err(Error::tool_execution(
                &subtask.tool,
                result.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ));
        }
        Ok(result.content)
    }

    fn peak_risk_score(&self, task_id: TaskId) -> Option<u32> {
        let query = AuditQuery::new()
            .with_kinds(vec![AuditKind::ToolCall])
            .with_task(task_id.to_string());

        self.router
            .audit()
            .query(&query)
            .into_iter()
            .filter_map(|entry| match entry.record {
                AuditRecord::ToolCall(call) => Some(call.risk_score),
                _ => None,
            })
            .max()
    }

    fn threat_level(&self, task_id: TaskId) -> ThreatLevel {
        self.router.scoring().threat_level(&task_id.to_string())
    }

    fn forget(&self, task_id: TaskId) {
        self.router.scoring().reset(&task_id.to_string());
    }

    fn name(&self) -> &'static str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use warden_foundation::SecurityMode;
    use warden_tool::{register_builtins, ToolRegistry};

    fn router(root: &std::path::Path) -> Arc<ToolRouter> {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        Arc::new(
            ToolRouter::builder(root)
                .registry(registry)
                .mode(SecurityMode::Developer)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_execute_tags_calls_with_task() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let executor = RouterExecutor::new(router(dir.path()));
        let task_id = TaskId::new();

        let out = executor
            .execute(
                task_id,
                &Subtask::new("read_file", json!({ "path": "a.txt" })),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("hello"));

        let calls = executor.router().audit().tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].task_id.as_deref(), Some(task_id.to_string().as_str()));
        assert_eq!(executor.peak_risk_score(task_id), Some(calls[0].risk_score));
        assert_eq!(executor.peak_risk_score(TaskId::new()), None);
        assert_eq!(executor.threat_level(task_id), ThreatLevel::Normal);
    }

    #[tokio::test]
    async fn test_execute_surfaces_router_errors() {
        let dir = tempdir().unwrap();
        let executor = RouterExecutor::new(router(dir.path()));

        let err = executor
            .execute(
                TaskId::new(),
                &Subtask::new("no_such_tool", json!({})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }
}
