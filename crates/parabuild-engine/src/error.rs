//! Engine errors.

use std::path::PathBuf;

use parabuild_core::{TaskError, WorkerIndex};
use thiserror::Error;

/// Errors raised while provisioning workspaces.
///
/// Any of these aborts engine construction; no pool is started.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to clean workspace root {}: {source}", .path.display())]
    Clean {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot read source project {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid exclude pattern: {0}")]
    InvalidExclude(#[from] globset::Error),

    #[error("Failed to walk project tree for worker {worker}: {source}")]
    Walk {
        worker: WorkerIndex,
        source: walkdir::Error,
    },

    #[error("Failed to copy {} for worker {worker}: {source}", .path.display())]
    Copy {
        worker: WorkerIndex,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Empty init command for worker {worker}")]
    EmptyCommand { worker: WorkerIndex },

    #[error("Failed to spawn init command `{command}` for worker {worker}: {source}")]
    Spawn {
        worker: WorkerIndex,
        command: String,
        source: std::io::Error,
    },

    #[error("Init command `{command}` failed for worker {worker} with {status}: {stderr}")]
    CommandFailed {
        worker: WorkerIndex,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Provisioning job failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Aggregate failure of a run: at least one task failed.
#[derive(Debug, Error)]
#[error("run aborted after {failed_workers} worker failure(s); first: {first}")]
pub struct RunError {
    #[source]
    first: TaskError,
    failed_workers: usize,
}

impl RunError {
    pub(crate) fn new(first: TaskError, failed_workers: usize) -> Self {
        Self {
            first,
            failed_workers,
        }
    }

    /// First task failure observed.
    pub fn first(&self) -> &TaskError {
        &self.first
    }

    /// Number of workers that stopped because of a failed task.
    pub fn failed_workers(&self) -> usize {
        self.failed_workers
    }

    pub fn into_first(self) -> TaskError {
        self.first
    }
}

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Project path {} does not exist", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: WorkerIndex,
        source: std::io::Error,
    },

    #[error("Task queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Worker {0} exited without delivering a result")]
    WorkerLost(WorkerIndex),

    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
