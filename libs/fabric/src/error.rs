use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use vox_core::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Failed to dial {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    #[error("Write failed: {0}")]
    Write(#[source] Box<Error>),

    #[error("A request is already waiting for a reply")]
    Busy,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reply slot closed before a message arrived")]
    SlotClosed,

    #[error("Client is shutting down")]
    Shutdown,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub(crate) fn dial(endpoint: &str, reason: impl ToString) -> Self {
        Self::Dial {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
