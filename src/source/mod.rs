//! Input boundary: JSONL records into `InputEvent`s

pub mod codec;
pub mod reader;

pub use codec::{decode_line, CodecError};
pub use reader::{JsonlSource, SourceStats};
