//! Integration tests for schema initialization using in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;
use surrealdb_types::SurrealValue;

#[derive(Debug, SurrealValue)]
struct RevisionRow {
    revision: u64,
}

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    gestor_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<surrealdb_types::Value> = result.take(0).unwrap();
    let info = info.expect("INFO FOR DB should return a value");
    let info_str = format!("{:?}", info);

    for table in ["user", "family", "permission", "audit_log", "graph_revision"] {
        assert!(info_str.contains(table), "missing {table} table");
    }
    for edge in ["member_of", "holds", "child_of", "grants"] {
        assert!(info_str.contains(edge), "missing {edge} edge");
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    gestor_db::run_migrations(&db).await.unwrap();
    gestor_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("SELECT revision FROM graph_revision").await.unwrap();
    let rows: Vec<RevisionRow> = result.take(0).unwrap();
    assert_eq!(rows.len(), 1, "graph revision must be seeded exactly once");
    assert_eq!(rows[0].revision, 0);
}
