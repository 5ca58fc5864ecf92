#![forbid(unsafe_code)]

use lx_core::model::MessageRole;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    MessageAlreadyExists,
    UnknownMessage,
    RoleMismatch { actual: MessageRole },
    Corrupt(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::MessageAlreadyExists => write!(f, "message already exists"),
            Self::UnknownMessage => write!(f, "unknown message"),
            Self::RoleMismatch { actual } => {
                write!(f, "operation requires a USER message, found {}", actual.as_str())
            }
            Self::Corrupt(what) => write!(f, "corrupt row: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
