//! Workspace provisioning.
//!
//! Every worker gets its own copy of the source project under
//! `workspace_root/worker_<i>/`, after which the init commands run inside it.
//! All workspaces are provisioned concurrently; the first failure aborts the
//! remaining jobs and is returned to the caller.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use parabuild_core::{WorkerIndex, Workspace};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::ProvisionError;

/// Glob patterns of source entries that are not copied.
///
/// A pattern excludes an entry when it matches any trailing run of components
/// of the entry's path relative to the project root, down to the bare file
/// name. Excluded directories are skipped with everything below them.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim_start_matches("./").trim_end_matches('/');
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// Patterns are not anchored: `out/cache` also excludes `x/out/cache`.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let components: Vec<Component<'_>> = relative.components().collect();
        (0..components.len()).any(|start| {
            let tail: PathBuf = components[start..].iter().collect();
            self.set.is_match(&tail)
        })
    }
}

/// Creates and initializes the per-worker workspaces.
pub struct WorkspaceProvisioner {
    source: PathBuf,
    root: PathBuf,
    excludes: Arc<ExcludeSet>,
    init_commands: Arc<Vec<Vec<String>>>,
}

impl WorkspaceProvisioner {
    /// Create a new provisioner.
    pub fn new<S: AsRef<str>>(
        source: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        excludes: &[S],
        init_commands: Vec<Vec<String>>,
    ) -> Result<Self, ProvisionError> {
        Ok(Self {
            source: source.into(),
            root: root.into(),
            excludes: Arc::new(ExcludeSet::new(excludes)?),
            init_commands: Arc::new(init_commands),
        })
    }

    /// Create a provisioner from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ProvisionError> {
        Self::new(
            &config.project_path,
            &config.workspace_root,
            &config.excludes,
            config.init_commands.clone(),
        )
    }

    /// Remove the workspace root and everything below it.
    pub async fn clean(&self) -> Result<(), ProvisionError> {
        remove_workspace_root(&self.root).await
    }

    /// Provision `count` workspaces, returned in worker-index order.
    ///
    /// Returns only once every workspace is copied and initialized.
    pub async fn provision(
        &self,
        count: usize,
        clean: bool,
    ) -> Result<Vec<Workspace>, ProvisionError> {
        if clean {
            self.clean().await?;
        }

        let root = create_dir(&self.root).await?;
        let source = tokio::fs::canonicalize(&self.source)
            .await
            .map_err(|source| ProvisionError::Source {
                path: self.source.clone(),
                source,
            })?;
        // A workspace root nested in the project must not be copied into itself.
        let nested_root = root.strip_prefix(&source).ok().map(Path::to_path_buf);

        info!(
            source = %source.display(),
            root = %root.display(),
            workers = count,
            init_commands = self.init_commands.len(),
            "Provisioning workspaces"
        );

        let mut jobs = JoinSet::new();
        for i in 0..count {
            let index = WorkerIndex::new(i);
            let job = ProvisionJob {
                workspace: Workspace::new(index, root.join(index.dir_name())),
                source: source.clone(),
                nested_root: nested_root.clone(),
                excludes: self.excludes.clone(),
                init_commands: self.init_commands.clone(),
            };
            jobs.spawn(job.run());
        }

        let mut workspaces = Vec::with_capacity(count);
        while let Some(joined) = jobs.join_next().await {
            match joined? {
                Ok(workspace) => workspaces.push(workspace),
                Err(e) => {
                    warn!(error = %e, "Provisioning failed, aborting remaining workspaces");
                    jobs.abort_all();
                    return Err(e);
                }
            }
        }

        workspaces.sort_by_key(Workspace::index);
        info!(workers = workspaces.len(), "All workspaces provisioned");
        Ok(workspaces)
    }
}

/// Remove a workspace root and everything below it. A missing root is not an
/// error.
pub async fn remove_workspace_root(root: &Path) -> Result<(), ProvisionError> {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => {
            info!(root = %root.display(), "Removed workspace root");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "No workspace root to remove");
            Ok(())
        }
        Err(source) => Err(ProvisionError::Clean {
            path: root.to_path_buf(),
            source,
        }),
    }
}

/// Provisioning of a single workspace.
struct ProvisionJob {
    workspace: Workspace,
    source: PathBuf,
    nested_root: Option<PathBuf>,
    excludes: Arc<ExcludeSet>,
    init_commands: Arc<Vec<Vec<String>>>,
}

impl ProvisionJob {
    async fn run(self) -> Result<Workspace, ProvisionError> {
        let worker = self.workspace.index();
        create_dir(self.workspace.path()).await?;

        let source = self.source.clone();
        let dest = self.workspace.path().to_path_buf();
        let excludes = self.excludes.clone();
        let nested_root = self.nested_root.clone();
        tokio::task::spawn_blocking(move || {
            copy_tree(&source, &dest, &excludes, nested_root.as_deref(), worker)
        })
        .await??;
        debug!(worker = %worker, "Project copied");

        for argv in self.init_commands.iter() {
            run_init_command(&self.workspace, argv).await?;
        }

        info!(
            worker = %worker,
            path = %self.workspace.path().display(),
            "Workspace ready"
        );
        Ok(self.workspace)
    }
}

async fn create_dir(path: &Path) -> Result<PathBuf, ProvisionError> {
    let map_err = |source| ProvisionError::CreateDir {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(path).await.map_err(map_err)?;
    tokio::fs::canonicalize(path).await.map_err(map_err)
}

async fn run_init_command(workspace: &Workspace, argv: &[String]) -> Result<(), ProvisionError> {
    let worker = workspace.index();
    let (program, args) = argv
        .split_first()
        .ok_or(ProvisionError::EmptyCommand { worker })?;
    let command = argv.join(" ");
    debug!(worker = %worker, command = %command, "Running init command");

    let output = Command::new(program)
        .args(args)
        .current_dir(workspace.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProvisionError::Spawn {
            worker,
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(
            worker = %worker,
            command = %command,
            status = %output.status,
            "Init command failed"
        );
        return Err(ProvisionError::CommandFailed {
            worker,
            command,
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(())
}

/// Copy `source` into `dest`, honoring the exclude set.
fn copy_tree(
    source: &Path,
    dest: &Path,
    excludes: &ExcludeSet,
    nested_root: Option<&Path>,
    worker: WorkerIndex,
) -> Result<(), ProvisionError> {
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(source) {
            Ok(relative) => {
                Some(relative) != nested_root && !excludes.is_excluded(relative)
            }
            Err(_) => true,
        });

    for entry in walker {
        let entry = entry.map_err(|source| ProvisionError::Walk { worker, source })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        let file_type = entry.file_type();

        let copied = if file_type.is_dir() {
            fs::create_dir_all(&target)
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)
        } else {
            fs::copy(entry.path(), &target).map(|_| ())
        };
        copied.map_err(|source| ProvisionError::Copy {
            worker,
            path: entry.path().to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/CMakeCache.txt"), "stale\n").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.cpp"), "int main() { return 0; }\n").unwrap();
        fs::write(root.join("src/main.o"), "obj").unwrap();
        fs::write(root.join("CMakeLists.txt"), "project(demo)\n").unwrap();
        dir
    }

    #[test]
    fn test_exclude_set_matching() {
        let set = ExcludeSet::new(&[".git", "build/", "*.o", "docs/*.md"]).unwrap();
        assert!(set.is_excluded(Path::new(".git")));
        assert!(set.is_excluded(Path::new("build")));
        assert!(set.is_excluded(Path::new("nested/build")));
        assert!(set.is_excluded(Path::new("src/main.o")));
        assert!(set.is_excluded(Path::new("docs/readme.md")));
        assert!(!set.is_excluded(Path::new("src/main.cpp")));
        assert!(!set.is_excluded(Path::new("builder")));
    }

    #[test]
    fn test_multi_component_patterns_match_at_any_depth() {
        let set = ExcludeSet::new(&["out/cache", "docs/*.md"]).unwrap();
        assert!(set.is_excluded(Path::new("out/cache")));
        assert!(set.is_excluded(Path::new("x/out/cache")));
        assert!(set.is_excluded(Path::new("a/b/out/cache")));
        assert!(set.is_excluded(Path::new("pkg/docs/intro.md")));
        assert!(!set.is_excluded(Path::new("out")));
        assert!(!set.is_excluded(Path::new("cache")));
        assert!(!set.is_excluded(Path::new("x/out/cached")));
        assert!(!set.is_excluded(Path::new("docs/guide/intro.md")));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let result = WorkspaceProvisioner::new("p", "w", &["a[b"], vec![]);
        assert!(matches!(result, Err(ProvisionError::InvalidExclude(_))));
    }

    #[tokio::test]
    async fn test_provision_copies_and_initializes() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let provisioner = WorkspaceProvisioner::new(
            project.path(),
            root.path().join("ws"),
            &[".git", "build", "*.o"],
            vec![vec!["touch".to_string(), "initialized".to_string()]],
        )
        .unwrap();

        let workspaces = provisioner.provision(3, false).await.unwrap();

        assert_eq!(workspaces.len(), 3);
        for (i, ws) in workspaces.iter().enumerate() {
            assert_eq!(ws.index(), WorkerIndex::new(i));
            assert!(ws.path().is_absolute());
            assert!(ws.path().ends_with(format!("worker_{i}")));
            assert!(ws.join("src/main.cpp").is_file());
            assert!(ws.join("CMakeLists.txt").is_file());
            assert!(ws.join("initialized").is_file());
            assert!(!ws.join(".git").exists());
            assert!(!ws.join("build").exists());
            assert!(!ws.join("src/main.o").exists());
        }
    }

    #[tokio::test]
    async fn test_failing_init_command_aborts() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let provisioner = WorkspaceProvisioner::new(
            project.path(),
            root.path(),
            &[] as &[&str],
            vec![vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo cmake exploded >&2; exit 1".to_string(),
            ]],
        )
        .unwrap();

        let err = provisioner.provision(2, false).await.unwrap_err();
        match err {
            ProvisionError::CommandFailed { stderr, .. } => assert_eq!(stderr, "cmake exploded"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_workspaces_are_provisioned_concurrently() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let arrivals = tempfile::tempdir().unwrap();
        // Each workspace waits until all three have started; run one at a
        // time, the first never sees the others and times out.
        let barrier = format!(
            "touch '{dir}'/\"$(basename \"$(pwd)\")\"; \
             i=0; \
             while [ \"$(ls '{dir}' | wc -l)\" -lt 3 ]; do \
               i=$((i + 1)); [ $i -gt 100 ] && exit 1; sleep 0.1; \
             done",
            dir = arrivals.path().display()
        );
        let provisioner = WorkspaceProvisioner::new(
            project.path(),
            root.path().join("ws"),
            &[".git"],
            vec![vec!["sh".to_string(), "-c".to_string(), barrier]],
        )
        .unwrap();

        let workspaces = provisioner.provision(3, false).await.unwrap();

        assert_eq!(workspaces.len(), 3);
        let mut arrived: Vec<String> = fs::read_dir(arrivals.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        arrived.sort();
        assert_eq!(arrived, vec!["worker_0", "worker_1", "worker_2"]);
    }

    #[tokio::test]
    async fn test_missing_source_is_source_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("no-such-project");
        let provisioner =
            WorkspaceProvisioner::new(&missing, root.path().join("ws"), &[] as &[&str], vec![])
                .unwrap();

        match provisioner.provision(2, false).await.unwrap_err() {
            ProvisionError::Source { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remove_workspace_root() {
        let root = tempfile::tempdir().unwrap();
        let ws_root = root.path().join("ws");
        fs::create_dir_all(ws_root.join("worker_3/build")).unwrap();
        fs::write(ws_root.join("worker_3/build/main"), "bin").unwrap();

        remove_workspace_root(&ws_root).await.unwrap();
        assert!(!ws_root.exists());

        // Already gone.
        remove_workspace_root(&ws_root).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let provisioner = WorkspaceProvisioner::new(
            project.path(),
            root.path(),
            &[] as &[&str],
            vec![vec!["parabuild-no-such-program".to_string()]],
        )
        .unwrap();

        let err = provisioner.provision(1, false).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_clean_removes_leftovers() {
        let project = project();
        let root = tempfile::tempdir().unwrap();
        let ws_root = root.path().join("ws");
        fs::create_dir_all(ws_root.join("worker_0")).unwrap();
        fs::write(ws_root.join("worker_0/leftover"), "old").unwrap();

        let provisioner =
            WorkspaceProvisioner::new(project.path(), &ws_root, &[".git"], vec![]).unwrap();

        provisioner.provision(1, false).await.unwrap();
        assert!(ws_root.join("worker_0/leftover").exists());

        provisioner.provision(1, true).await.unwrap();
        assert!(!ws_root.join("worker_0/leftover").exists());
        assert!(ws_root.join("worker_0/src/main.cpp").exists());
    }

    #[tokio::test]
    async fn test_nested_workspace_root_is_not_copied() {
        let project = project();
        let provisioner = WorkspaceProvisioner::new(
            project.path(),
            project.path().join("parabuild_workspace"),
            &[".git"],
            vec![],
        )
        .unwrap();

        let workspaces = provisioner.provision(2, false).await.unwrap();
        for ws in &workspaces {
            assert!(ws.join("src/main.cpp").exists());
            assert!(!ws.join("parabuild_workspace").exists());
        }
    }
}
