pub mod apns_jwt;
pub mod client_token;
pub mod error;
pub mod rotation;

pub use apns_jwt::ApnsSigner;
pub use client_token::{issue_client_token, verify_client_token, VerifiedSecret};
pub use error::{AuthError, Result};
pub use rotation::{apply_token_post, is_changed, RotationOutcome, TokenPost};
