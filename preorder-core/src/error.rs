use std::io;
use std::path::Path;

/// Recoverable failures: files that cannot be opened, read or written.
///
/// Malformed records inside a readable file are deliberately *not* represented
/// here. The input pipeline is machine-generated, so a bad alignment line or a
/// ragged factor column is a bug upstream and aborts the process with a
/// diagnostic instead of being skipped silently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("model file {path}: {reason}")]
    Model { path: String, reason: String },
}

impl Error {
    pub fn io(path: &Path, source: io::Error) -> Error {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn model(path: &Path, reason: impl Into<String>) -> Error {
        Error::Model {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
