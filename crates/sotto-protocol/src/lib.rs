pub mod chunks;
pub mod error;

pub use chunks::{ContentChunk, ContentKind, ControlChunk, ControlVerb};
pub use error::{ChunkError, Result};
