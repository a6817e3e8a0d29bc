//! # warden-task
//!
//! Task lifecycle for Warden.
//!
//! ## Features
//!
//! - Task state machine (`QUEUED → RUNNING ⇄ PAUSED → terminal`)
//! - Worker pool bounded by `workerConcurrency`, one task per worker
//! - Every subtask runs through `ToolRouter` via [`RouterExecutor`]
//! - Kill switch that cancels every active task and pending permission wait
//! - Watchdog for stalled tasks, startup recovery, purge
//! - Atomic per-task records behind the [`TaskStore`] trait

pub mod executor;
pub mod manager;
pub mod state;
pub mod store;
pub mod task;

pub use executor::{RouterExecutor, SubtaskExecutor};
pub use manager::{TaskEvent, TaskFilter, TaskManager, TaskManagerConfig, TaskStats};
pub use state::{TaskAction, TaskStatus};
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore};
pub use task::{Subtask, Task, TaskId, TaskLogEntry};
