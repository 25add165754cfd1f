use vox_core::Message;

use crate::codec::Codec;
use crate::error::Result;

/// Colon-delimited line codec for bus messages
///
/// Stateless; encoding joins the fields with `:` and decoding applies the
/// full token grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl Codec for LineCodec {
    type Item = Message;

    fn encode(&self, item: &Message) -> String {
        item.to_string()
    }

    fn decode(&self, frame: &str) -> Result<Message> {
        Ok(Message::parse(frame)?)
    }
}
