//! Loading the command registry from a JSON file
//!
//! The file holds an array of command definitions:
//! ```json
//! [
//!   {"Name": "uptime", "Command": "uptime", "Params": []},
//!   {"Name": "disk", "Command": "df -h | head -5"}
//! ]
//! ```
//! Lower-case keys are accepted as well.

use crate::command::CommandSpec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The registry file could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read and parse a registry file
pub fn load_commands(path: impl AsRef<Path>) -> Result<Vec<CommandSpec>, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_commands(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse registry JSON already held in memory
pub fn parse_commands(json: &str) -> Result<Vec<CommandSpec>, serde_json::Error> {
    serde_json::from_str(json)
}
