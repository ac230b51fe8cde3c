use thiserror::Error;

/// A `Data` value did not have the shape a translator expected, or a
/// domain conversion wrapped by a translator failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("domain conversion failed: {0}")]
    Domain(String),
}

impl TranslationError {
    pub fn wrong_type(expected: &'static str, found: &'static str) -> Self {
        TranslationError::WrongType { expected, found }
    }
}

impl From<serde_json::Error> for TranslationError {
    fn from(err: serde_json::Error) -> Self {
        TranslationError::Encoding(err.to_string())
    }
}

/// Errors raised by a `Database`, its trees and maps, and storage backends.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The caller passed an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not valid in the current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The storage engine failed while performing an otherwise valid operation.
    #[error("backend error: {0}")]
    Backend(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

/// Submission to a `KeyedExecutor` was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Outcome of a task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was dropped before it ran")]
    Cancelled,
    #[error("timed out waiting for task")]
    Timeout,
}

/// Configuration could not be read, parsed, or written.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
