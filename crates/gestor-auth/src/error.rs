//! Authentication error types.

use gestor_core::error::GestorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is inactive")]
    AccountInactive,

    #[error("password policy: {0}")]
    PasswordPolicy(String),

    #[error("cryptography error: {0}")]
    Crypto(String),
}

impl From<AuthError> for GestorError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::AccountInactive => {
                GestorError::AuthenticationFailed {
                    reason: err.to_string(),
                }
            }
            AuthError::PasswordPolicy(message) => GestorError::Validation { message },
            AuthError::Crypto(msg) => GestorError::Crypto(msg),
        }
    }
}
