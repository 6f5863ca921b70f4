use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Chunk offset is not a number: {0:?}")]
    BadOffset(String),

    #[error("Unrecognized reserved offset: {0}")]
    UnknownOffset(i64),

    #[error("Control chunk has {got} fields, expected {expected}")]
    WrongFieldCount { expected: usize, got: usize },

    #[error("Chunk has no offset separator")]
    MissingSeparator,
}

pub type Result<T> = std::result::Result<T, ChunkError>;
