use std::io;

use thiserror::Error;

/// Failures surfaced by the store, the service and the client.
#[derive(Debug, Error)]
pub enum Error {
    /// No record exists for the tag.
    #[error("no file tagged {0:?}")]
    NotFound(String),

    /// Registry unreachable or the connection broke mid-request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Input rejected before anything was stored.
    #[error("{0}")]
    Validation(String),

    /// Blob bytes could not be written or read.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// The index file could not be encoded or decoded.
    #[error("index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The registry answered with a status the client has no mapping for.
    #[error("unexpected response {0}: {1}")]
    Status(u16, String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// HTTP status the service answers with when this error ends a request.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Validation(_) => 400,
            Error::Status(code, _) => *code,
            _ => 500,
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Error {
        match e {
            ureq::Error::Status(code, res) => {
                let body = res.into_string().unwrap_or_default();
                Error::Status(code, body)
            },
            ureq::Error::Transport(t) => {
                Error::Transport(t.to_string())
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
