//! Error types shared by the queue, pub/sub and storage layers.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    /// The storage adapter failed, or a stored record could not be decoded.
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    /// No live job exists with this id.
    #[error("job {id} not found")]
    NotFound { id: u64 },

    /// The operation isn't legal for the job's current state.
    #[error("job {id} is {state}, expected {expected}")]
    InvalidState {
        id: u64,
        state: &'static str,
        expected: &'static str,
    },

    /// Storage hasn't been opened, or has been closed.
    #[error("storage is not open")]
    NotOpen,

    /// The configuration couldn't be read or parsed.
    #[error("config error: {context}")]
    Config {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn storage(source: impl Into<BoxError>) -> Self {
        Self::Storage(source.into())
    }

    pub(crate) fn config(
        context: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Config {
            context: context.into(),
            source: source.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::storage(source)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
