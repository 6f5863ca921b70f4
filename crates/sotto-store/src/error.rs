use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
