//! Core domain errors.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{TaskArgs, WorkerIndex};

/// Errors raised by task records and workspace helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required task argument is absent.
    #[error("Missing task argument: {0}")]
    MissingArgument(String),

    /// A task argument could not be converted to the requested type.
    #[error("Invalid task argument '{key}': {reason}")]
    InvalidArgument { key: String, reason: String },

    /// A command vector with no program.
    #[error("Empty command")]
    EmptyCommand,

    /// A command exited unsuccessfully.
    #[error("Command `{command}` failed with {status} in {}: {stderr}", .cwd.display())]
    CommandFailed {
        command: String,
        cwd: PathBuf,
        status: String,
        stderr: String,
    },

    /// A line edit pointed past the end of the file.
    #[error("Line {line} out of range for {} ({lines} lines)", .path.display())]
    LineOutOfRange {
        path: PathBuf,
        line: usize,
        lines: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure record for a single task.
///
/// Carries enough context to reproduce the failing task by hand: the worker
/// and workspace it ran in, its arguments, and the failure message including
/// the full cause chain.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("task failed on worker {worker} in {}: {message} (args: {args})", .workspace.display())]
pub struct TaskError {
    /// Worker that ran the task.
    pub worker: WorkerIndex,

    /// Workspace the task ran in.
    pub workspace: PathBuf,

    /// Arguments the task was submitted with.
    pub args: TaskArgs,

    /// Failure message.
    pub message: String,

    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

impl TaskError {
    /// Create a new TaskError stamped with the current time.
    pub fn new(
        worker: WorkerIndex,
        workspace: impl Into<PathBuf>,
        args: TaskArgs,
        message: impl Into<String>,
    ) -> Self {
        Self {
            worker,
            workspace: workspace.into(),
            args,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display_has_context() {
        let args = TaskArgs::new().with("n", 10042);
        let err = TaskError::new(WorkerIndex::new(3), "/tmp/ws/worker_3", args, "make failed");
        let text = err.to_string();
        assert!(text.contains("worker 3"));
        assert!(text.contains("/tmp/ws/worker_3"));
        assert!(text.contains("make failed"));
        assert!(text.contains("10042"));
    }

    #[test]
    fn test_task_error_serializes() {
        let err = TaskError::new(WorkerIndex::new(0), "/w", TaskArgs::new(), "boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["worker"], 0);
        assert_eq!(json["message"], "boom");
        let back: TaskError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
