use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Stored value is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error(transparent)]
    Auth(#[from] sotto_auth::AuthError),

    #[error(transparent)]
    Store(#[from] sotto_store::StoreError),
}

pub type Result<T> = std::result::Result<T, PushError>;
