use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, Result};

/// Reserved destination meaning "every node on the bus"
pub const BROADCAST: &str = "ALL";

const MIN_FIELDS: usize = 4;

/// One addressed bus command or reply
///
/// Fields are kept as decoded; `verb` and `noun` are upper-cased by
/// [`Message::parse`], `to` and `from` keep their case.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub to: String,
    pub verb: String,
    pub noun: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub from: String,
}

impl Message {
    /// Build an outgoing message with no arguments and an empty sender
    ///
    /// The sender is filled in by the client when the message is transmitted.
    pub fn new(to: impl Into<String>, verb: impl Into<String>, noun: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            verb: verb.into(),
            noun: noun.into(),
            args: Vec::new(),
            from: String::new(),
        }
    }

    /// Replace the argument list
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sender field
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Overwrite this message into the standard failure reply shape
    pub fn err<I, S>(&mut self, reason: impl Into<String>, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verb = "ERR".to_string();
        self.noun = reason.into();
        self.args = args.into_iter().map(Into::into).collect();
    }

    /// Overwrite this message into the standard success reply shape
    pub fn ok<I, S>(&mut self, reason: impl Into<String>, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verb = "OK".to_string();
        self.noun = reason.into();
        self.args = args.into_iter().map(Into::into).collect();
    }

    pub fn is_ok(&self) -> bool {
        self.verb.eq_ignore_ascii_case("OK")
    }

    pub fn is_err(&self) -> bool {
        self.verb.eq_ignore_ascii_case("ERR")
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// Decode one wire line
    pub fn parse(line: &str) -> Result<Self> {
        let s = line.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        // frames are single-line, no whitespace anywhere
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::Whitespace);
        }

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < MIN_FIELDS {
            return Err(ParseError::TooFewFields(parts.len()));
        }

        let to = parts[0];
        let verb = parts[1];
        let noun = parts[2];
        let from = parts[parts.len() - 1];
        let args = &parts[3..parts.len() - 1];

        if to != BROADCAST && !is_token(to) && !is_hex_id(to) {
            return Err(ParseError::InvalidTo(to.to_string()));
        }
        if from == BROADCAST || (!is_token(from) && !is_hex_id(from)) {
            return Err(ParseError::InvalidFrom(from.to_string()));
        }
        if !is_token(verb) {
            return Err(ParseError::InvalidVerb(verb.to_string()));
        }
        if !is_token(noun) {
            return Err(ParseError::InvalidNoun(noun.to_string()));
        }
        if let Some((index, value)) = args.iter().enumerate().find(|(_, a)| !is_token(a)) {
            return Err(ParseError::InvalidArg {
                index,
                value: (*value).to_string(),
            });
        }

        Ok(Self {
            to: to.to_string(),
            verb: verb.to_ascii_uppercase(),
            noun: noun.to_ascii_uppercase(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            from: from.to_string(),
        })
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Encodes as `To:Verb:Noun[:Args...]:From`; no escaping is applied
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.to, self.verb, self.noun)?;
        for arg in &self.args {
            write!(f, ":{arg}")?;
        }
        write!(f, ":{}", self.from)
    }
}

/// `[A-Za-z0-9_.-]+`
pub fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Two hex digits, either case
pub fn is_hex_id(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
