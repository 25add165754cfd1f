//! Vox Core - wire data model for the control bus
//!
//! A bus frame is one colon-delimited line:
//!
//! ```text
//! <To>:<Verb>:<Noun>[:<Arg>...]:<From>
//! ```
//!
//! # Example
//!
//! ```
//! use vox_core::Message;
//!
//! let msg: Message = "VOX:ok:lamp:VERTEX".parse().unwrap();
//! assert_eq!(msg.verb, "OK");
//! assert_eq!(msg.to_string(), "VOX:OK:LAMP:VERTEX");
//! ```

pub mod error;
pub mod message;

pub use error::{ParseError, Result};
pub use message::{is_hex_id, is_token, Message, BROADCAST};
