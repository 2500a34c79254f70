//! SQLite infrastructure using SeaORM
//!
//! Every database in the instance directory (the registry, the op ledger, and
//! the per-subtree tree indexes) is opened through this wrapper. Tables are
//! created schema-from-entity with IF NOT EXISTS; these files are created on
//! demand so no migration framework is involved.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, DbErr,
    EntityTrait, Schema, Statement,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod entities;

const PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode=WAL",
    "PRAGMA synchronous=NORMAL",
    "PRAGMA temp_store=MEMORY",
    "PRAGMA cache_size=-20000",
];

/// One SQLite database file.
pub struct Database {
    conn: DatabaseConnection,
}

impl Database {
    /// Open the database at `path`, creating the file (and parent directory)
    /// if needed.
    pub async fn open(path: &Path) -> Result<Self, DbErr> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbErr::Custom(format!("Failed to create directory: {}", e)))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.display());

        let mut opt = ConnectOptions::new(db_url);
        opt.max_connections(10)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let conn = SeaDatabase::connect(opt).await?;
        for pragma in PRAGMAS {
            let _ = conn
                .execute(Statement::from_string(
                    sea_orm::DatabaseBackend::Sqlite,
                    *pragma,
                ))
                .await;
        }

        info!("Opened database at {:?}", path);
        Ok(Self { conn })
    }

    /// Create `entity`'s table if it does not exist yet.
    pub async fn ensure_table<E: EntityTrait>(&self, entity: E) -> Result<(), DbErr> {
        let backend = self.conn.get_database_backend();
        let schema = Schema::new(backend);
        let mut statement = schema.create_table_from_entity(entity);
        statement.if_not_exists();
        self.conn.execute(backend.build(&statement)).await?;
        Ok(())
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}
