//! Parabuild Core Domain Types
//!
//! This crate contains the domain types shared by the engine and its callers,
//! with no dependencies on:
//! - The async runtime
//! - Channels or thread management
//! - Terminal rendering
//!
//! Everything a task function touches (its [`Task`] record, the [`Workspace`]
//! it runs in, the [`Reducer`] its outputs are folded through) lives here.

pub mod error;
pub mod ids;
pub mod reducer;
pub mod task;
pub mod workspace;

// Re-export commonly used types
pub use error::{CoreError, TaskError};
pub use ids::{RunId, WorkerIndex};
pub use reducer::{fold, Collect, Fold, Reducer, ReducerFactory, Sum};
pub use task::{Task, TaskArgs};
pub use workspace::Workspace;
