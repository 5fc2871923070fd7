//! Frame codec
//!
//! Serializes frames onto the TCP stream and parses them back, with optional
//! deflate compression of the audio body.

pub mod compress;
pub mod decoder;
pub mod encoder;

pub use decoder::{FrameDecoder, ReadOutcome};
pub use encoder::FrameEncoder;
