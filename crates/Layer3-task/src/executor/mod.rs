//! Subtask executors

mod router;
mod r#trait;

pub use router::RouterExecutor;
pub use r#trait::SubtaskExecutor;
