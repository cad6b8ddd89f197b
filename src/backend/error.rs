use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers that only care about the family of
/// a failure (status line wording, whether to retry, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfBounds,
    Construction,
    Io,
    Network,
    Decode,
    Timeout,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("page index {index} out of bounds (archive has {len} pages)")]
    OutOfBounds { index: usize, len: usize },

    #[error("couldn't open archive: {0}")]
    Construction(String),

    #[error("archive type not supported: {0}")]
    UnsupportedArchive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("rar error: {0}")]
    Rar(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("couldn't decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("ran out of time waiting for page {index} to download (waited {waited:?})")]
    Timeout { index: usize, waited: Duration },

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("no archive is open")]
    Closed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Error::Construction(_) | Error::UnsupportedArchive(_) | Error::Closed => {
                ErrorKind::Construction
            }
            Error::Io(_) | Error::Zip(_) | Error::Rar(_) | Error::TaskJoin(_) => ErrorKind::Io,
            Error::Network(_) => ErrorKind::Network,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskJoin(err.to_string())
    }
}
