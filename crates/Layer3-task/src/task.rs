//! Task definition and types

use crate::state::{TaskAction, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::str::FromStr;
use uuid::Uuid;
use warden_foundation::{Error, Result};

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, for log lines
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid task id '{}': {}", s, e)))
    }
}

/// One planned tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl Subtask {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    /// Workspace path this subtask writes, for the builtin file tools
    pub fn created_path(&self) -> Option<&str> {
        let key = match self.tool.as_str() {
            "write_file" | "create_dir" => "path",
            "move_file" => "to",
            _ => return None,
        };
        self.args.get(key).and_then(Value::as_str)
    }
}

/// A line in the per-task log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A task and its persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    /// Natural-language request
    pub description: String,

    /// Ordered subtask intents from the planner
    #[serde(default)]
    pub subtasks: Vec<Subtask>,

    pub status: TaskStatus,

    /// 0..=100
    pub progress: u8,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Last transition or progress update (watchdog reference point)
    pub updated_at: DateTime<Utc>,

    pub output: Option<String>,
    pub error: Option<String>,

    /// Highest risk score seen across this task's tool calls
    #[serde(default)]
    pub peak_risk_score: u32,

    /// Index of the next subtask to execute
    #[serde(default)]
    pub next_subtask: usize,

    /// Paths written by finished subtasks, in order
    #[serde(default)]
    pub files_created: Vec<String>,

    #[serde(default)]
    pub log: VecDeque<TaskLogEntry>,
}

impl Task {
    /// Create a new task in QUEUED
    pub fn new(description: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.into(),
            subtasks,
            status: TaskStatus::Queued,
            progress: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
            output: None,
            error: None,
            peak_risk_score: 0,
            next_subtask: 0,
            files_created: Vec::new(),
            log: VecDeque::new(),
        }
    }

    /// Apply a state change, stamping times and logging it
    pub fn apply(&mut self, action: TaskAction, max_log: usize) -> Result<TaskStatus> {
        let from = self.status;
        let to = from
            .apply(action)
            .ok_or_else(|| Error::invalid_transition(self.id, from, action.as_str()))?;

        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        if action == TaskAction::Start {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        self.push_log(format!("{} -> {}", from, to), max_log);
        Ok(to)
    }

    /// Append to the bounded log
    pub fn push_log(&mut self, message: impl Into<String>, max_log: usize) {
        self.log.push_back(TaskLogEntry {
            at: Utc::now(),
            message: message.into(),
        });
        while self.log.len() > max_log.max(1) {
            self.log.pop_front();
        }
    }

    pub fn add_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.files_created.contains(&path) {
            self.files_created.push(path);
        }
    }

    pub fn remaining_subtasks(&self) -> usize {
        self.subtasks.len().saturating_sub(self.next_subtask)
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<std::time::Duration> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_stamps_times() {
        let mut task = Task::new("delete temp.txt", vec![]);
        assert_eq!(task.status, TaskStatus::Queued);

        task.apply(TaskAction::Start, 10).unwrap();
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_none());

        task.apply(TaskAction::Complete, 10).unwrap();
        assert!(task.ended_at.is_some());
        assert_eq!(task.log.len(), 2);
        assert_eq!(task.log[1].message, "Running -> Completed");
    }

    #[test]
    fn test_invalid_transition_leaves_task_untouched() {
        let mut task = Task::new("x", vec![]);
        let before = task.clone();
        let err = task.apply(TaskAction::Complete, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(task, before);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut task = Task::new("x", vec![]);
        for i in 0..10 {
            task.push_log(format!("note {}", i), 3);
        }
        assert_eq!(task.log.len(), 3);
        assert_eq!(task.log[0].message, "note 7");
    }

    #[test]
    fn test_record_shape() {
        let task = Task::new(
            "delete temp.txt",
            vec![Subtask::new("delete_file", json!({ "path": "temp.txt" }))],
        );
        let value = serde_json::to_value(&task).unwrap();
        for field in [
            "id",
            "description",
            "status",
            "subtasks",
            "progress",
            "createdAt",
            "startedAt",
            "endedAt",
            "output",
            "error",
            "peakRiskScore",
            "filesCreated",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(value["status"], "QUEUED");

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_created_paths() {
        let write = Subtask::new("write_file", json!({ "path": "out/report.md", "content": "x" }));
        let mkdir = Subtask::new("create_dir", json!({ "path": "out" }));
        let rename = Subtask::new("move_file", json!({ "from": "a.txt", "to": "b.txt" }));
        let read = Subtask::new("read_file", json!({ "path": "a.txt" }));
        assert_eq!(write.created_path(), Some("out/report.md"));
        assert_eq!(mkdir.created_path(), Some("out"));
        assert_eq!(rename.created_path(), Some("b.txt"));
        assert_eq!(read.created_path(), None);

        let mut task = Task::new("x", vec![]);
        task.add_file("out");
        task.add_file("out/report.md");
        task.add_file("out");
        assert_eq!(task.files_created, vec!["out", "out/report.md"]);
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!("nope".parse::<TaskId>().is_err());
        assert_eq!(id.short().len(), 8);
    }
}
