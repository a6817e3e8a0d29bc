//! Task state machine
//!
//! ```text
//! QUEUED ─► RUNNING ⇄ PAUSED ─► { COMPLETED | FAILED | CANCELLED }
//!    └──────────────────┴──────► CANCELLED
//! ```

use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task is waiting for a worker
    Queued,

    /// Task is currently running
    Running,

    /// Task is suspended between subtasks
    Paused,

    /// Task completed successfully
    Completed,

    /// Task failed with an error
    Failed,

    /// Task was cancelled
    Cancelled,
}

/// A requested state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Cancel,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Start => "start",
            TaskAction::Pause => "pause",
            TaskAction::Resume => "resume",
            TaskAction::Complete => "complete",
            TaskAction::Fail => "fail",
            TaskAction::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Target state of `action`, or None if the transition is not allowed
    pub fn apply(self, action: TaskAction) -> Option<TaskStatus> {
        use TaskAction::*;
        use TaskStatus::*;

        match (self, action) {
            (Queued, Start) => Some(Running),
            (Running, Pause) => Some(Paused),
            (Paused, Resume) => Some(Running),
            (Running, Complete) => Some(Completed),
            (Running | Paused, Fail) => Some(Failed),
            (Queued | Running | Paused, Cancel) => Some(Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Queued, running or paused
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    /// Check if task completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "Queued",
            TaskStatus::Running => "Running",
            TaskStatus::Paused => "Paused",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }

    /// Get a symbol for the state (for TUI)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "◎",
            TaskStatus::Running => "⟳",
            TaskStatus::Paused => "⏸",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Cancelled => "⊘",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [TaskAction; 6] = [
        TaskAction::Start,
        TaskAction::Pause,
        TaskAction::Resume,
        TaskAction::Complete,
        TaskAction::Fail,
        TaskAction::Cancel,
    ];

    #[test]
    fn test_happy_path() {
        let status = TaskStatus::Queued;
        let status = status.apply(TaskAction::Start).unwrap();
        let status = status.apply(TaskAction::Pause).unwrap();
        let status = status.apply(TaskAction::Resume).unwrap();
        assert_eq!(status.apply(TaskAction::Complete), Some(TaskStatus::Completed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in TaskStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for action in ACTIONS {
                assert_eq!(status.apply(action), None, "{} -> {}", status, action);
            }
        }
    }

    #[test]
    fn test_cancel_from_every_active_state() {
        for status in TaskStatus::ALL.iter().filter(|s| s.is_active()) {
            assert_eq!(status.apply(TaskAction::Cancel), Some(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(TaskStatus::Queued.apply(TaskAction::Complete), None);
        assert_eq!(TaskStatus::Queued.apply(TaskAction::Pause), None);
        assert_eq!(TaskStatus::Paused.apply(TaskAction::Complete), None);
        assert_eq!(TaskStatus::Running.apply(TaskAction::Start), None);
        assert_eq!(TaskStatus::Running.apply(TaskAction::Resume), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"CANCELLED\"");
    }
}
