//! Engine configuration.

use std::path::PathBuf;

use crate::error::EngineError;

/// Default directory holding the per-worker workspaces.
pub const DEFAULT_WORKSPACE_ROOT: &str = "parabuild_workspace";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Source project copied into every workspace. Never modified.
    pub project_path: PathBuf,

    /// Commands run, in order, inside each fresh workspace.
    pub init_commands: Vec<Vec<String>>,

    /// Glob patterns of source entries left out of the copies.
    pub excludes: Vec<String>,

    /// Directory holding `worker_<i>` workspaces.
    pub workspace_root: PathBuf,

    /// Number of workers (and workspaces).
    pub num_workers: usize,

    /// Render progress while joining.
    pub progress: bool,

    /// Remove `workspace_root` before provisioning.
    pub clean: bool,
}

impl EngineConfig {
    /// Create a config for `project_path` with defaults for everything else.
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            ..Self::default()
        }
    }

    /// Builder method to add an init command.
    pub fn with_init_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.init_commands
            .push(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Builder method to add an exclude pattern.
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Builder method to set the workspace root.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Builder method to set the worker count.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Builder method to toggle progress rendering.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Builder method to toggle cleaning the workspace root first.
    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Check the parts of the config that do not touch the filesystem.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.num_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if let Some(i) = self.init_commands.iter().position(|argv| argv.is_empty()) {
            return Err(EngineError::InvalidConfig(format!(
                "init command #{i} is empty"
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            init_commands: Vec::new(),
            excludes: Vec::new(),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            num_workers: num_cpus::get(),
            progress: true,
            clean: false,
        }
    }
}
