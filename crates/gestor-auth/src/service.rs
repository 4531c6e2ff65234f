//! Authentication service: registration, login and password changes.

use gestor_core::error::{GestorError, GestorResult};
use gestor_core::models::audit::Actor;
use gestor_core::models::user::{CreateUser, User};
use gestor_core::models::version::ConcurrencyToken;
use gestor_core::repository::UserRepository;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::password::PasswordHasher;

/// Input for registering a new user.
#[derive(Debug)]
pub struct RegisterUser {
    pub display_name: String,
    pub login_name: String,
    pub password: String,
}

/// Authentication service.
///
/// Generic over the user repository and the hasher so that the auth
/// layer has no dependency on the database crate.
pub struct AuthService<U: UserRepository, H: PasswordHasher> {
    users: U,
    hasher: H,
    config: AuthConfig,
    /// Verified against on unknown logins so they cost as much as a
    /// wrong password.
    decoy_hash: Option<String>,
}

impl<U: UserRepository, H: PasswordHasher> AuthService<U, H> {
    pub fn new(users: U, hasher: H, config: AuthConfig) -> Self {
        let decoy_hash = hasher.hash("gestor-unknown-login").ok();
        Self {
            users,
            hasher,
            config,
            decoy_hash,
        }
    }

    /// Hash the password and create the user.
    pub async fn register(&self, input: RegisterUser) -> GestorResult<User> {
        self.check_policy(&input.password)?;
        let password_hash = self.hasher.hash(&input.password)?;

        let user = self
            .users
            .create(CreateUser {
                display_name: input.display_name,
                login_name: input.login_name,
                password_hash,
            })
            .await?;

        info!(user_id = %user.id, login_name = %user.login_name, "Registered user");
        Ok(user)
    }

    /// Check a login name and password, returning the caller identity
    /// used on audit entries.
    ///
    /// Unknown logins, wrong passwords and unreadable stored hashes all
    /// report `InvalidCredentials`, and all of them run one verification.
    pub async fn authenticate(&self, login_name: &str, password: &str) -> GestorResult<Actor> {
        let user = match self.users.get_by_login(login_name).await {
            Ok(u) => u,
            Err(GestorError::NotFound { .. }) => {
                if let Some(decoy) = &self.decoy_hash {
                    let _ = self.hasher.verify(password, decoy);
                }
                warn!(%login_name, "Login attempt for unknown user");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => return Err(e),
        };

        match self.hasher.verify(password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user.id, "Login attempt with wrong password");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
                return Err(AuthError::InvalidCredentials.into());
            }
        }

        if !user.active {
            return Err(AuthError::AccountInactive.into());
        }

        info!(user_id = %user.id, "User authenticated");
        Ok(Actor {
            user_id: user.id,
            login_name: user.login_name,
        })
    }

    /// Replace a user's password after checking the current one.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        token: ConcurrencyToken,
    ) -> GestorResult<User> {
        let user = self.users.get_by_id(user_id).await?;
        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }

        self.check_policy(new_password)?;
        let password_hash = self.hasher.hash(new_password)?;

        let user = self
            .users
            .set_password_hash(user_id, password_hash, token)
            .await?;
        info!(%user_id, "Password changed");
        Ok(user)
    }

    fn check_policy(&self, password: &str) -> Result<(), AuthError> {
        let min = self.config.min_password_length;
        if password.chars().count() < min {
            return Err(AuthError::PasswordPolicy(format!(
                "password must be at least {min} characters"
            )));
        }
        Ok(())
    }
}
