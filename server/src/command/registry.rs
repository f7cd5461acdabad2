//! Static registry of commands the server is willing to run

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

/// A command that the server can execute.
///
/// `name` is what clients send in a request, `command` is the shell command
/// line that actually runs. `params` lists the parameter names the command
/// declares; they are metadata only and are never interpolated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,

    #[serde(rename = "Command", alias = "command")]
    pub command: String,

    #[serde(
        rename = "Params",
        alias = "params",
        default,
        deserialize_with = "nullable_list"
    )]
    pub params: Vec<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Declare parameter names for this command
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }
}

// `"Params": null` is treated the same as a missing key
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Immutable, ordered set of command definitions.
///
/// Built once at startup and only ever read afterwards, so it can be shared
/// between sessions behind an `Arc` without locking.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
}

impl CommandRegistry {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self { commands }
    }

    /// Find a command by exact, case-sensitive name.
    ///
    /// If the same name was registered more than once, the first entry wins.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|command| command.name == name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    /// Names registered more than once, each reported once in registration order
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();

        for command in &self.commands {
            let name = command.name.as_str();
            if !seen.insert(name) && reported.insert(name) {
                duplicates.push(name);
            }
        }

        duplicates
    }
}
