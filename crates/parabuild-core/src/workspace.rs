//! Worker-owned workspace directories.
//!
//! A [`Workspace`] is a full copy of the source project that belongs to exactly
//! one worker. The helpers here are blocking on purpose: task functions run on
//! dedicated worker threads and drive external build tools synchronously.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CoreError, WorkerIndex};

/// Isolated working directory bound to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    index: WorkerIndex,
    path: PathBuf,
}

impl Workspace {
    /// Create a new Workspace handle. `path` should be absolute.
    pub fn new(index: WorkerIndex, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }

    /// Index of the owning worker.
    pub fn index(&self) -> WorkerIndex {
        self.index
    }

    /// Root directory of the workspace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a path relative to the workspace root.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Run a command in the workspace root, discarding its stdout.
    pub fn run<S: AsRef<str>>(&self, argv: &[S]) -> Result<(), CoreError> {
        self.run_in(".", argv)
    }

    /// Run a command in a subdirectory of the workspace, discarding its stdout.
    pub fn run_in<S: AsRef<str>>(
        &self,
        subdir: impl AsRef<Path>,
        argv: &[S],
    ) -> Result<(), CoreError> {
        self.exec(subdir.as_ref(), argv, Stdio::null()).map(|_| ())
    }

    /// Run a command in the workspace root and return its stdout.
    pub fn output<S: AsRef<str>>(&self, argv: &[S]) -> Result<String, CoreError> {
        self.output_in(".", argv)
    }

    /// Run a command in a subdirectory of the workspace and return its stdout.
    pub fn output_in<S: AsRef<str>>(
        &self,
        subdir: impl AsRef<Path>,
        argv: &[S],
    ) -> Result<String, CoreError> {
        let output = self.exec(subdir.as_ref(), argv, Stdio::piped())?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Replace line `line` (0-based) of a workspace file with `content`.
    ///
    /// A trailing newline is appended to `content` when missing.
    pub fn replace_line(
        &self,
        relative: impl AsRef<Path>,
        line: usize,
        content: &str,
    ) -> Result<(), CoreError> {
        let path = self.join(relative);
        let text = fs::read_to_string(&path)?;
        let mut lines: Vec<&str> = text.split_inclusive('\n').collect();
        if line >= lines.len() {
            return Err(CoreError::LineOutOfRange {
                path,
                line,
                lines: lines.len(),
            });
        }

        let replacement = if content.ends_with('\n') {
            content.to_string()
        } else {
            format!("{content}\n")
        };
        lines[line] = &replacement;
        fs::write(&path, lines.concat())?;
        Ok(())
    }

    fn exec<S: AsRef<str>>(
        &self,
        subdir: &Path,
        argv: &[S],
        stdout: Stdio,
    ) -> Result<Output, CoreError> {
        let (program, args) = argv.split_first().ok_or(CoreError::EmptyCommand)?;
        let cwd = self.path.join(subdir);
        debug!(
            worker = %self.index,
            cwd = %cwd.display(),
            program = program.as_ref(),
            "Running workspace command"
        );

        let output = Command::new(program.as_ref())
            .args(args.iter().map(AsRef::as_ref))
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(CoreError::CommandFailed {
                command: argv.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" "),
                cwd,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(WorkerIndex::new(0), dir.path());
        (dir, ws)
    }

    #[test]
    fn test_replace_line() {
        let (_dir, ws) = workspace();
        fs::write(ws.join("main.cpp"), "#include <cstdio>\n\n#define N 0\nint main() {}\n").unwrap();

        ws.replace_line("main.cpp", 2, "#define N 10001").unwrap();

        let text = fs::read_to_string(ws.join("main.cpp")).unwrap();
        assert_eq!(text, "#include <cstdio>\n\n#define N 10001\nint main() {}\n");
    }

    #[test]
    fn test_replace_line_out_of_range() {
        let (_dir, ws) = workspace();
        fs::write(ws.join("a.txt"), "one\ntwo\n").unwrap();
        let err = ws.replace_line("a.txt", 5, "x").unwrap_err();
        assert!(matches!(err, CoreError::LineOutOfRange { line: 5, lines: 2, .. }));
    }

    #[test]
    fn test_output_and_failure() {
        let (_dir, ws) = workspace();
        fs::create_dir(ws.join("build")).unwrap();

        let out = ws.output_in("build", &["sh", "-c", "pwd"]).unwrap();
        assert!(out.trim().ends_with("build"));

        let err = ws.run(&["sh", "-c", "echo broken >&2; exit 3"]).unwrap_err();
        match err {
            CoreError::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_command() {
        let (_dir, ws) = workspace();
        let empty: [&str; 0] = [];
        assert!(matches!(ws.run(&empty), Err(CoreError::EmptyCommand)));
    }
}
