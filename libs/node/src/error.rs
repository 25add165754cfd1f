use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] vox_fabric::Error),

    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Missing entity: {0}")]
    MissingEntity(&'static str),

    #[error("Request rejected: {reason} {}", .detail.join(" "))]
    Rejected { reason: String, detail: Vec<String> },

    #[error("A listening session is already active")]
    SessionActive,

    #[error("No speech pipeline configured")]
    NoPipeline,

    #[error("Speech pipeline error: {0}")]
    Pipeline(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
