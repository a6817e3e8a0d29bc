//! Executor trait

use crate::task::{Subtask, TaskId};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use warden_foundation::{Result, ThreatLevel};

/// Runs one subtask on behalf of a task worker
///
/// Implementations must return promptly with `Error::Cancelled` once `cancel` fires.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    /// Execute a subtask and return its text output
    async fn execute(
        &self,
        task_id: TaskId,
        subtask: &Subtask,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Highest risk score recorded for the task's calls
    fn peak_risk_score(&self, _task_id: TaskId) -> Option<u32> {
        None
    }

    /// Accumulated threat level for the task
    fn threat_level(&self, _task_id: TaskId) -> ThreatLevel {
        ThreatLevel::Normal
    }

    /// Drop per-task state once the task has ended or been purged
    fn forget(&self, _task_id: TaskId) {}

    /// Get executor name
    fn name(&self) -> &'static str;
}
