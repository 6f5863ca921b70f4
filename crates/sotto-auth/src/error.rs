use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Token signature matched neither the current nor the prior secret,
    /// or its issuer is not the presenting client.
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Stored secret is not valid hex")]
    BadSecretHex(#[from] hex::FromHexError),

    #[error("Client has no device token; cannot rotate")]
    MissingDeviceToken,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
