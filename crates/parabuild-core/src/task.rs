//! Task records handed to task functions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CoreError, Workspace};

/// Named arguments of one submitted task.
///
/// A JSON object; the engine never inspects it and adds the
/// workspace separately through [`Task::workspace`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskArgs(Map<String, Value>);

impl TaskArgs {
    /// Create an empty argument map.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder method to add an argument.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a required argument converted to `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        self.get_opt(key)?
            .ok_or_else(|| CoreError::MissingArgument(key.to_string()))
    }

    /// Get an optional argument converted to `T`.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| CoreError::InvalidArgument {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TaskArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

impl From<Map<String, Value>> for TaskArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TaskArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A unit of work as seen by a task function.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Workspace of the worker running this task.
    pub workspace: Workspace,

    /// Client-supplied arguments.
    pub args: TaskArgs,
}

impl Task {
    /// Create a new Task.
    pub fn new(workspace: Workspace, args: TaskArgs) -> Self {
        Self { workspace, args }
    }

    /// Shorthand for `self.args.get(key)`.
    pub fn arg<T: DeserializeOwned>(&self, key: &str) -> Result<T, CoreError> {
        self.args.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let args = TaskArgs::new().with("n", 10007).with("label", "fast");
        assert_eq!(args.get::<i64>("n").unwrap(), 10007);
        assert_eq!(args.get::<String>("label").unwrap(), "fast");
        assert_eq!(args.get_opt::<u32>("missing").unwrap(), None);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_missing_and_invalid() {
        let args = TaskArgs::new().with("n", "not a number");
        assert!(matches!(
            args.get::<i64>("absent"),
            Err(CoreError::MissingArgument(k)) if k == "absent"
        ));
        assert!(matches!(
            args.get::<i64>("n"),
            Err(CoreError::InvalidArgument { key, .. }) if key == "n"
        ));
    }

    #[test]
    fn test_display_is_json() {
        let args: TaskArgs = [("id", 4)].into_iter().collect();
        assert_eq!(args.to_string(), r#"{"id":4}"#);
        assert_eq!(TaskArgs::new().to_string(), "{}");
    }
}
