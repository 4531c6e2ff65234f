//! Opening the permission store.
//!
//! [`DbManager`] owns a migrated SurrealDB handle and hands out the
//! repository implementations that share it.

use surrealdb::engine::local::{Db, Mem};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::{Connection, Surreal};
use tracing::info;

use crate::error::DbError;
use crate::repository::{
    SurrealAuditLogRepository, SurrealFamilyRepository, SurrealPermissionRepository,
    SurrealUserRepository,
};
use crate::schema::run_migrations;

/// Root credentials for servers that require sign-in.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
}

/// Where the permission store lives.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// WebSocket endpoint, e.g. `127.0.0.1:8000`.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// `None` skips sign-in.
    pub credentials: Option<DbCredentials>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8000".into(),
            namespace: "gestor".into(),
            database: "permisos".into(),
            credentials: None,
        }
    }
}

/// A migrated SurrealDB handle plus repository constructors.
#[derive(Clone)]
pub struct DbManager<C: Connection> {
    db: Surreal<C>,
}

impl DbManager<Client> {
    /// Connect to a remote server, select the configured namespace and
    /// database, and apply pending migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            endpoint = %config.endpoint,
            namespace = %config.namespace,
            database = %config.database,
            "Opening permission store"
        );

        let db = Surreal::new::<Ws>(&config.endpoint).await?;
        if let Some(credentials) = &config.credentials {
            db.signin(Root {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            })
            .await?;
        }

        Self::open(db, &config.namespace, &config.database).await
    }
}

impl DbManager<Db> {
    /// A fresh in-memory store, migrated and ready.
    pub async fn in_memory(namespace: &str, database: &str) -> Result<Self, DbError> {
        let db = Surreal::new::<Mem>(()).await?;
        Self::open(db, namespace, database).await
    }
}

impl<C: Connection> DbManager<C> {
    async fn open(db: Surreal<C>, namespace: &str, database: &str) -> Result<Self, DbError> {
        db.use_ns(namespace).use_db(database).await?;
        run_migrations(&db).await?;
        info!(namespace, database, "Permission store ready");
        Ok(Self { db })
    }

    pub fn client(&self) -> &Surreal<C> {
        &self.db
    }

    pub fn users(&self) -> SurrealUserRepository<C> {
        SurrealUserRepository::new(self.db.clone())
    }

    pub fn families(&self) -> SurrealFamilyRepository<C> {
        SurrealFamilyRepository::new(self.db.clone())
    }

    pub fn permissions(&self) -> SurrealPermissionRepository<C> {
        SurrealPermissionRepository::new(self.db.clone())
    }

    pub fn audit(&self) -> SurrealAuditLogRepository<C> {
        SurrealAuditLogRepository::new(self.db.clone())
    }
}
