//! Gestor Auth — password hashing and caller authentication.

pub mod config;
pub mod error;
pub mod password;
pub mod service;

pub use config::AuthConfig;
pub use error::AuthError;
pub use password::{Argon2Hasher, PasswordHasher};
pub use service::{AuthService, RegisterUser};
