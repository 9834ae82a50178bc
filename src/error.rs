use thiserror::Error;

use crate::client::ClientError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task already exists: {0}")]
    DuplicateName(String),

    #[error("Task not found in graph: {0}")]
    UnknownNode(String),

    #[error("Adding dependency from {from} to {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Task {task} references {reference}, which has no recorded result")]
    UnresolvedReference { task: String, reference: String },

    #[error("No result recorded for task: {0}")]
    NotFound(String),

    #[error("Result already recorded for task: {0}")]
    AlreadyRecorded(String),

    #[error("Operation failed in task {task}: {source}")]
    OperationFailed {
        task: String,
        #[source]
        source: ClientError,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
