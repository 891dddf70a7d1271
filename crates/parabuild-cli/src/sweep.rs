//! Sweep plan: argument parsing for `parabuild sweep` and the task it runs in
//! every workspace.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use parabuild_core::{Task, TaskArgs};

/// Placeholder replaced by the swept value in edits and steps.
pub const PLACEHOLDER: &str = "{value}";

/// Task argument carrying the swept value.
pub const VALUE_ARG: &str = "value";

/// Half-open integer range given as `START..END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange(pub Range<i64>);

impl FromStr for ValueRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| format!("expected START..END, got '{s}'"))?;
        let start: i64 = start
            .trim()
            .parse()
            .map_err(|e| format!("invalid range start '{start}': {e}"))?;
        let end: i64 = end
            .trim()
            .parse()
            .map_err(|e| format!("invalid range end '{end}': {e}"))?;
        if start > end {
            return Err(format!("range start {start} is after end {end}"));
        }
        Ok(Self(start..end))
    }
}

/// A whitespace-separated command line, e.g. `"make -j4"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine(pub Vec<String>);

impl CommandLine {
    /// Arguments with every placeholder replaced by `value`.
    pub fn render(&self, value: &str) -> Vec<String> {
        self.0.iter().map(|a| a.replace(PLACEHOLDER, value)).collect()
    }
}

impl FromStr for CommandLine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let argv: Vec<String> = s.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err("command must not be empty".to_string());
        }
        Ok(Self(argv))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Replace one line of a workspace file, given as `FILE:LINE=TEMPLATE`.
///
/// `LINE` is 1-based on the command line and stored 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEdit {
    pub file: PathBuf,
    pub line: usize,
    pub template: String,
}

impl LineEdit {
    pub fn render(&self, value: &str) -> String {
        self.template.replace(PLACEHOLDER, value)
    }
}

impl FromStr for LineEdit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, template) = s
            .split_once('=')
            .ok_or_else(|| format!("expected FILE:LINE=TEMPLATE, got '{s}'"))?;
        let (file, line) = target
            .rsplit_once(':')
            .ok_or_else(|| format!("expected FILE:LINE before '=', got '{target}'"))?;
        if file.is_empty() {
            return Err("file must not be empty".to_string());
        }
        let line: usize = line
            .parse()
            .map_err(|e| format!("invalid line number '{line}': {e}"))?;
        let line = line
            .checked_sub(1)
            .ok_or_else(|| "line numbers start at 1".to_string())?;

        Ok(Self {
            file: PathBuf::from(file),
            line,
            template: template.to_string(),
        })
    }
}

/// What every task does with its value.
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    pub edits: Vec<LineEdit>,
    pub steps: Vec<CommandLine>,
}

impl SweepPlan {
    /// Apply the edits, run the steps, and return the last step's stdout.
    ///
    /// Without steps the output is empty.
    pub fn run(&self, task: &Task) -> anyhow::Result<String> {
        let value: String = task.arg(VALUE_ARG)?;
        let workspace = &task.workspace;

        for edit in &self.edits {
            workspace
                .replace_line(&edit.file, edit.line, &edit.render(&value))
                .with_context(|| format!("editing {} for value {value}", edit.file.display()))?;
        }

        let mut output = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            let argv = step.render(&value);
            let context = || format!("step '{step}' for value {value}");
            if i + 1 == self.steps.len() {
                output = workspace.output(&argv).with_context(context)?;
            } else {
                workspace.run(&argv).with_context(context)?;
            }
        }
        Ok(output)
    }
}

/// Task arguments for every swept value, in submission order.
pub fn sweep_args(range: Option<&ValueRange>, values: &[String]) -> Vec<TaskArgs> {
    match range {
        Some(ValueRange(range)) => range
            .clone()
            .map(|v| TaskArgs::new().with(VALUE_ARG, v.to_string()))
            .collect(),
        None => values
            .iter()
            .map(|v| TaskArgs::new().with(VALUE_ARG, v.as_str()))
            .collect(),
    }
}
