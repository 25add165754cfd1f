use thiserror::Error;

/// Reasons an inbound frame fails structural or grammar validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("invalid whitespace present")]
    Whitespace,

    #[error("too few fields: got {0}, want >= 4")]
    TooFewFields(usize),

    #[error("invalid TO token: {0:?}")]
    InvalidTo(String),

    #[error("invalid FROM token: {0:?}")]
    InvalidFrom(String),

    #[error("invalid VERB token: {0:?}")]
    InvalidVerb(String),

    #[error("invalid NOUN token: {0:?}")]
    InvalidNoun(String),

    #[error("invalid ARG[{index}]: {value:?}")]
    InvalidArg { index: usize, value: String },
}

pub type Result<T> = std::result::Result<T, ParseError>;
