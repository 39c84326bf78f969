use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedder error: {0}")]
    Embedder(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Queue conflict: {0}")]
    Queue(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn storage(err: impl Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn embedder(err: impl Display) -> Self {
        Self::Embedder(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
