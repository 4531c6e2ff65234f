//! Gestor administrative entry point.
//!
//! Connects to SurrealDB, applies pending migrations, optionally creates
//! the first administrator, and logs a summary of the family hierarchy.

mod config;

use gestor_auth::{Argon2Hasher, AuthService, RegisterUser};
use gestor_core::error::GestorError;
use gestor_core::hierarchy::FamilyTreeNode;
use gestor_core::repository::UserRepository;
use gestor_core::FamilyHierarchy;
use gestor_db::{DbError, DbManager};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, ServerConfig};

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Gestor(#[from] GestorError),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gestor=info")),
        )
        .json()
        .init();

    info!("Starting gestor...");

    let config = ServerConfig::from_env()?;
    let store = DbManager::connect(&config.db).await?;
    let users = store.users();

    if let Some(admin) = &config.bootstrap_admin {
        match users.get_by_login(&admin.login_name).await {
            Ok(_) => info!(login_name = %admin.login_name, "Bootstrap administrator already exists"),
            Err(GestorError::NotFound { .. }) => {
                let hasher = Argon2Hasher::new(&config.auth).map_err(GestorError::from)?;
                let auth = AuthService::new(users.clone(), hasher, config.auth.clone());
                auth.register(RegisterUser {
                    display_name: "Administrador".into(),
                    login_name: admin.login_name.clone(),
                    password: admin.password.clone(),
                })
                .await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let hierarchy = FamilyHierarchy::new(store.families());
    let tree = hierarchy.get_all_with_hierarchy().await?;
    let listed = FamilyTreeNode::flatten(&tree);
    info!(
        roots = tree.len(),
        rows = listed.len(),
        "Loaded family hierarchy"
    );
    for node in &listed {
        if !node.repeated && node.effective_permission_count == 0 {
            warn!(
                family = %node.family.name,
                depth = node.depth,
                "Family grants no permissions"
            );
        }
    }

    info!("gestor stopped.");
    Ok(())
}
