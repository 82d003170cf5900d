use jdremote_core::{CryptoError, SessionError, WireError};
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum Error {
    /// The relay rejected the credentials or tokens. Call `connect` again.
    #[error("authentication rejected by {src}: {kind}")]
    Authentication { src: String, kind: String },

    #[error("no connection established")]
    NotConnected,

    /// The handshake answer was unusable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Error envelope or undecodable answer.
    #[error("remote error from {src}: {kind} ({context})")]
    Protocol {
        src: String,
        kind: String,
        context: String,
    },

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidResponse(err.to_string())
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Crypto(e) => Error::Crypto(e),
            WireError::Json(e) => e.into(),
        }
    }
}
