pub mod app;
pub mod cli;
pub mod config;
pub mod serial;

use serial::errors::SerialFailureKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    InvalidArgs(String),
    Io(std::io::Error),
    Serial {
        kind: SerialFailureKind,
        message: String,
    },
}

impl Error {
    pub fn serial(kind: SerialFailureKind, message: impl Into<String>) -> Self {
        Error::Serial {
            kind,
            message: message.into(),
        }
    }

    /// Failure reason for this error, classifying raw I/O errors on the fly.
    pub fn kind(&self) -> SerialFailureKind {
        serial::errors::classify_error(self)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Serial { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}
