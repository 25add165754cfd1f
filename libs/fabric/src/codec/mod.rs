use crate::error::Result;

pub mod line;

pub use self::line::LineCodec;

/// Codec trait for converting between frame text and typed messages
pub trait Codec: Send + Sync {
    type Item;

    /// Encode a value into one frame
    fn encode(&self, item: &Self::Item) -> String;

    /// Decode one frame into a value
    fn decode(&self, frame: &str) -> Result<Self::Item>;
}
