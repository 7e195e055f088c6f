//! Task types owned by simulations.
//!
//! A simulation owns exactly one task: either a plain command line
//! (`CommandTask`) or a script driven by a `config.json` written before
//! execution (`JsonConfiguredTask`). Sweep callbacks mutate the latter's
//! parameter mapping.

use crate::ids::{TagMap, TagValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quote one word for safe embedding in a shell command line.
///
/// Plain words pass through untouched; anything else is single-quoted with
/// embedded quotes escaped as `'\''`, so the shell sees each argument as
/// exactly one word.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// An executable plus argument vector; no structured parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTask {
    /// Executable to invoke.
    pub executable: String,
    /// Argument vector passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTask {
    /// Create a command task from an executable and arguments.
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    /// Render the full command line, quoting each argument so the shell
    /// does not re-tokenize it.
    pub fn command_line(&self) -> String {
        let mut parts = vec![shell_quote(&self.executable)];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

/// A script plus a parameter mapping written to `config.json` before
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonConfiguredTask {
    /// Script path relative to the simulation directory (or absolute).
    pub script_path: String,
    /// Interpreter used to launch the script.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Parameter mapping serialized to `config.json`.
    #[serde(default)]
    pub parameters: BTreeMap<String, TagValue>,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

impl JsonConfiguredTask {
    /// Create a JSON-configured task for a script.
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            interpreter: default_interpreter(),
            parameters: BTreeMap::new(),
        }
    }

    /// Set one parameter and return the tag recording it.
    ///
    /// Sweep callbacks apply values through this so the parameter map and
    /// the simulation's tags stay in sync.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: TagValue) -> TagMap {
        let name = name.into();
        self.parameters.insert(name.clone(), value.clone());
        let mut tags = TagMap::new();
        tags.insert(name, value);
        tags
    }

    /// Render the launch command line; the config file is found by
    /// convention in the working directory.
    pub fn command_line(&self) -> String {
        format!(
            "{} {}",
            shell_quote(&self.interpreter),
            shell_quote(&self.script_path)
        )
    }

    /// Serialize the parameter mapping as the `config.json` body.
    pub fn config_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.parameters)?)
    }
}

/// The task owned by a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Command(CommandTask),
    JsonConfigured(JsonConfiguredTask),
}

impl Task {
    /// Render the command line the launcher executes.
    pub fn command_line(&self) -> String {
        match self {
            Task::Command(t) => t.command_line(),
            Task::JsonConfigured(t) => t.command_line(),
        }
    }

    /// The parameter mapping, when the task carries one.
    pub fn parameters(&self) -> Option<&BTreeMap<String, TagValue>> {
        match self {
            Task::Command(_) => None,
            Task::JsonConfigured(t) => Some(&t.parameters),
        }
    }

    /// Mutable access to the JSON-configured form, when applicable.
    pub fn as_json_configured_mut(&mut self) -> Option<&mut JsonConfiguredTask> {
        match self {
            Task::Command(_) => None,
            Task::JsonConfigured(t) => Some(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_task_command_line() {
        let task = CommandTask::new("python", vec!["model1.py".to_string()]);
        assert_eq!(task.command_line(), "python model1.py");
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        // An argument with whitespace must stay one shell word.
        let task = CommandTask::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        assert_eq!(task.command_line(), "sh -c 'exit 3'");

        let task = CommandTask::new("echo", vec!["it's".to_string()]);
        assert_eq!(task.command_line(), r#"echo 'it'\''s'"#);

        let task = CommandTask::new("echo", vec!["$HOME;rm".to_string()]);
        assert_eq!(task.command_line(), "echo '$HOME;rm'");
    }

    #[test]
    fn test_json_task_command_line_quotes_paths() {
        let task = JsonConfiguredTask::new("my model.py");
        assert_eq!(task.command_line(), "python3 'my model.py'");
    }

    #[test]
    fn test_json_task_set_parameter_returns_tag() {
        let mut task = JsonConfiguredTask::new("model.py");
        let tags = task.set_parameter("a", TagValue::Int(3));
        assert_eq!(tags.get("a"), Some(&TagValue::Int(3)));
        assert_eq!(task.parameters.get("a"), Some(&TagValue::Int(3)));
    }

    #[test]
    fn test_json_task_config_json_types() {
        let mut task = JsonConfiguredTask::new("model.py");
        task.set_parameter("a", TagValue::Int(1));
        task.set_parameter("b", TagValue::String("x".to_string()));
        let config = task.config_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert_eq!(value["a"], serde_json::json!(1));
        assert_eq!(value["b"], serde_json::json!("x"));
    }

    #[test]
    fn test_task_serialization_roundtrip() {
        let task = Task::JsonConfigured(JsonConfiguredTask::new("model.py"));
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains(r#""type":"json_configured""#));
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }
}
