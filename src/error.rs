use thiserror::Error;

/// Errors that can occur while opening a store or running table operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad open or table options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A column was addressed that the table schema does not declare.
    #[error("no column by the name '{column}' is defined in '{table}'")]
    UnknownColumn { table: String, column: String },

    /// An operation was addressed at a table name that was never defined.
    #[error("no table defined by the name '{0}'")]
    UnknownTable(String),

    /// A value could not be cast to or from its column representation.
    #[error("codec error: {0}")]
    Codec(String),

    /// The SQLite engine failed to execute a compiled statement.
    #[error("SQLite error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store was closed before the operation reached the backend.
    #[error("store is closed")]
    Closed,

    /// The blocking task running a statement panicked or was cancelled.
    #[error("backend task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// True for errors caused by the caller's configuration rather than the
    /// data or the engine.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::UnknownColumn { .. })
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Error::Codec(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
