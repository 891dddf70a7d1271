//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position of a worker in the pool.
///
/// Worker `i` owns the workspace directory `worker_<i>` and its terminal
/// reducer value is returned at position `i` of the result collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerIndex(usize);

impl WorkerIndex {
    /// Create a new WorkerIndex.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index.
    pub fn get(self) -> usize {
        self.0
    }

    /// Name of the workspace directory owned by this worker.
    pub fn dir_name(self) -> String {
        format!("worker_{}", self.0)
    }
}

impl fmt::Display for WorkerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for WorkerIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// Unique identifier for one engine run, attached to its log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_generate() {
        let id1 = RunId::generate();
        let id2 = RunId::generate();
        assert_ne!(id1, id2);
        assert!(Uuid::parse_str(&id1.to_string()).is_ok());
    }

    #[test]
    fn test_worker_dir_name() {
        assert_eq!(WorkerIndex::new(0).dir_name(), "worker_0");
        assert_eq!(WorkerIndex::from(12).dir_name(), "worker_12");
        assert_eq!(format!("{}", WorkerIndex::new(3)), "3");
    }

    #[test]
    fn test_worker_index_ordering() {
        let mut indices = vec![WorkerIndex::new(2), WorkerIndex::new(0), WorkerIndex::new(1)];
        indices.sort();
        assert_eq!(indices.iter().map(|i| i.get()).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
