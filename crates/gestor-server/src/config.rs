//! Server configuration from `GESTOR_*` environment variables.

use gestor_auth::AuthConfig;
use gestor_db::{DbConfig, DbCredentials};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got {value:?}")]
    NotANumber { key: &'static str, value: String },
}

/// Credentials for the administrator created on first start.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub login_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub auth: AuthConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl ServerConfig {
    /// Read the configuration from the process environment, loading a
    /// `.env` file first when one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay the variables `lookup` knows about on the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("GESTOR_DB_URL") {
            config.db.endpoint = endpoint;
        }
        if let Some(namespace) = lookup("GESTOR_DB_NAMESPACE") {
            config.db.namespace = namespace;
        }
        if let Some(database) = lookup("GESTOR_DB_DATABASE") {
            config.db.database = database;
        }
        if let (Some(username), Some(password)) =
            (lookup("GESTOR_DB_USERNAME"), lookup("GESTOR_DB_PASSWORD"))
        {
            config.db.credentials = Some(DbCredentials { username, password });
        }

        config.auth.pepper = lookup("GESTOR_PASSWORD_PEPPER").filter(|p| !p.is_empty());
        if let Some(value) = lookup("GESTOR_MIN_PASSWORD_LENGTH") {
            config.auth.min_password_length = parse_number("GESTOR_MIN_PASSWORD_LENGTH", value)?;
        }
        if let Some(value) = lookup("GESTOR_ARGON2_MEMORY_KIB") {
            config.auth.argon2_memory_kib = parse_number("GESTOR_ARGON2_MEMORY_KIB", value)?;
        }
        if let Some(value) = lookup("GESTOR_ARGON2_ITERATIONS") {
            config.auth.argon2_iterations = parse_number("GESTOR_ARGON2_ITERATIONS", value)?;
        }

        config.bootstrap_admin = match (
            lookup("GESTOR_ADMIN_LOGIN"),
            lookup("GESTOR_ADMIN_PASSWORD"),
        ) {
            (Some(login_name), Some(password)) => Some(BootstrapAdmin {
                login_name,
                password,
            }),
            _ => None,
        };

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::NotANumber { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.db.namespace, "gestor");
        assert_eq!(config.auth.min_password_length, 12);
        assert!(config.auth.pepper.is_none());
        assert!(config.bootstrap_admin.is_none());
        assert!(config.db.credentials.is_none());
    }

    #[test]
    fn credentials_need_both_variables() {
        let config = ServerConfig::from_lookup(lookup(&[("GESTOR_DB_USERNAME", "root")])).unwrap();
        assert!(config.db.credentials.is_none());

        let config = ServerConfig::from_lookup(lookup(&[
            ("GESTOR_DB_USERNAME", "root"),
            ("GESTOR_DB_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.db.credentials.map(|c| c.username).as_deref(), Some("root"));
    }

    #[test]
    fn variables_override_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("GESTOR_DB_URL", "db.internal:8000"),
            ("GESTOR_DB_DATABASE", "permisos"),
            ("GESTOR_PASSWORD_PEPPER", "s3cr3t"),
            ("GESTOR_MIN_PASSWORD_LENGTH", "16"),
            ("GESTOR_ADMIN_LOGIN", "admin"),
            ("GESTOR_ADMIN_PASSWORD", "a-long-admin-password"),
        ]))
        .unwrap();
        assert_eq!(config.db.endpoint, "db.internal:8000");
        assert_eq!(config.db.database, "permisos");
        assert_eq!(config.auth.pepper.as_deref(), Some("s3cr3t"));
        assert_eq!(config.auth.min_password_length, 16);
        assert_eq!(
            config.bootstrap_admin.map(|a| a.login_name).as_deref(),
            Some("admin")
        );
    }

    #[test]
    fn empty_pepper_means_none() {
        let config =
            ServerConfig::from_lookup(lookup(&[("GESTOR_PASSWORD_PEPPER", "")])).unwrap();
        assert!(config.auth.pepper.is_none());
    }

    #[test]
    fn bad_number_is_reported() {
        let err = ServerConfig::from_lookup(lookup(&[("GESTOR_MIN_PASSWORD_LENGTH", "doce")]))
            .unwrap_err();
        assert!(err.to_string().contains("GESTOR_MIN_PASSWORD_LENGTH"));
    }
}
