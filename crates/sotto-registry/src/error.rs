use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Record not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] sotto_store::StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
