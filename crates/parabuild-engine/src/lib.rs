//! Parabuild Engine
//!
//! Runs the same build-and-execute task over a parameter sweep in parallel:
//!
//! 1. [`provision`] copies the source project into one workspace per worker and
//!    runs the init commands in each, concurrently.
//! 2. [`worker`] starts one OS thread per workspace; workers pull tasks from a
//!    shared queue and fold outputs through a private reducer.
//! 3. [`progress`] watches the liveness and error channels while the queue
//!    drains.
//! 4. [`Engine::join`] collects one terminal value per worker, or fails with a
//!    [`RunError`] if any task failed.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod provision;
pub mod worker;

// Re-export main types
pub use config::{EngineConfig, DEFAULT_WORKSPACE_ROOT};
pub use engine::Engine;
pub use error::{EngineError, ProvisionError, RunError};
pub use progress::{LogProgress, NoProgress, ProgressReporter, TerminalProgress};
pub use provision::{remove_workspace_root, ExcludeSet, WorkspaceProvisioner};
pub use worker::TaskFn;

// Re-export the domain types task functions work with
pub use parabuild_core::{
    fold, Collect, Reducer, ReducerFactory, Sum, Task, TaskArgs, TaskError, WorkerIndex,
    Workspace,
};
