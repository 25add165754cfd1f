use vox_core::Message;

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Anything the client can put on the bus
///
/// All three shapes produce the same canonical frame, with this node's id
/// appended as the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A structured message; its `from` is overwritten with this node's id
    Message(Message),

    /// Shorthand `To:Verb:Noun[:Args...]`, encoded as `<raw>:<self>`
    Raw(String),

    /// Ordered tokens, encoded as `<t1>:<t2>:...:<self>`
    Tokens(Vec<String>),
}

impl Payload {
    /// Build the wire frame for this payload as sent by `shard`
    ///
    /// Fails with [`Error::UnsupportedPayload`] if the result would not be a
    /// well-formed frame.
    pub fn encode<C>(&self, codec: &C, shard: &str) -> Result<String>
    where
        C: Codec<Item = Message>,
    {
        let frame = match self {
            Self::Message(message) => {
                let mut message = message.clone();
                message.from = shard.to_string();
                codec.encode(&message)
            }
            Self::Raw(raw) => format!("{raw}:{shard}"),
            Self::Tokens(tokens) => {
                if tokens.is_empty() {
                    return Err(Error::UnsupportedPayload("empty token list".to_string()));
                }
                format!("{}:{shard}", tokens.join(":"))
            }
        };

        if frame.chars().any(char::is_whitespace) {
            return Err(Error::UnsupportedPayload(format!(
                "whitespace in frame {frame:?}"
            )));
        }
        codec
            .decode(&frame)
            .map_err(|e| Error::UnsupportedPayload(e.to_string()))?;

        Ok(frame)
    }
}

impl From<Message> for Payload {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<String> for Payload {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for Payload {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

impl From<Vec<String>> for Payload {
    fn from(tokens: Vec<String>) -> Self {
        Self::Tokens(tokens)
    }
}

impl From<Vec<&str>> for Payload {
    fn from(tokens: Vec<&str>) -> Self {
        Self::Tokens(tokens.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Payload {
    fn from(tokens: [&str; N]) -> Self {
        Self::Tokens(tokens.iter().map(|t| (*t).to_string()).collect())
    }
}
