use std::sync::Arc;

use sqlx::{Connection, Row};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::database::DatabasePool;

pub const BUILDS_TABLE: &str = "builds";
pub const TASKS_TABLE: &str = "build_tasks";

const SCHEMA_STATEMENTS: &[(&str, &str)] = &[
    (
        "builds table",
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id TEXT PRIMARY KEY,
            name TEXT,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'CREATED',
            world TEXT NOT NULL DEFAULT 'minecraft:overworld',
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        )
        "#,
    ),
    (
        "build_tasks table",
        r#"
        CREATE TABLE IF NOT EXISTS build_tasks (
            id TEXT PRIMARY KEY,
            build_id TEXT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            task_order INTEGER NOT NULL,
            task_type TEXT NOT NULL,
            task_data TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'QUEUED',
            executed_at INTEGER,
            error_message TEXT,
            description TEXT,
            created_at INTEGER NOT NULL,
            min_x INTEGER,
            min_y INTEGER,
            min_z INTEGER,
            max_x INTEGER,
            max_y INTEGER,
            max_z INTEGER,
            UNIQUE (build_id, task_order)
        )
        "#,
    ),
    (
        "builds status index",
        "CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status)",
    ),
    (
        "builds world index",
        "CREATE INDEX IF NOT EXISTS idx_builds_world ON builds(world)",
    ),
    (
        "builds created_at index",
        "CREATE INDEX IF NOT EXISTS idx_builds_created_at ON builds(created_at)",
    ),
    (
        "tasks build_id index",
        "CREATE INDEX IF NOT EXISTS idx_tasks_build_id ON build_tasks(build_id)",
    ),
    (
        "tasks status index",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON build_tasks(status)",
    ),
    (
        "tasks location index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_tasks_location_xz
            ON build_tasks(min_x, max_x, min_z, max_z)
            WHERE min_x IS NOT NULL
        "#,
    ),
];

/// Owns creation and teardown of the build tables.
///
/// Schema changes take the write side of a maintenance lock; build execution
/// holds the read side via [`SchemaManager::execution_permit`], so the tables
/// cannot be dropped underneath a running build.
pub struct SchemaManager {
    db: Arc<DatabasePool>,
    allow_destructive_reset: bool,
    maintenance: RwLock<()>,
}

impl SchemaManager {
    pub fn new(db: Arc<DatabasePool>, allow_destructive_reset: bool) -> Self {
        Self {
            db,
            allow_destructive_reset,
            maintenance: RwLock::new(()),
        }
    }

    pub async fn execution_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.maintenance.read().await
    }

    /// Creates any missing tables and indexes in one transaction. Safe to repeat.
    pub async fn initialize(&self) -> AppResult<()> {
        let _guard = self.maintenance.write().await;
        self.create_all().await
    }

    async fn create_all(&self) -> AppResult<()> {
        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin schema transaction: {}", e)))?;

        for (label, statement) in SCHEMA_STATEMENTS {
            if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
                warn!(step = label, error = %e, "Schema initialization failed, rolling back");
                tx.rollback().await.map_err(|re| {
                    AppError::DatabaseError(format!("Failed to roll back schema transaction: {}", re))
                })?;
                return Err(AppError::DatabaseError(format!(
                    "Failed to create {}: {}",
                    label, e
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit schema: {}", e)))?;
        info!("Database schema initialized");
        Ok(())
    }

    /// True only when both tables exist.
    pub async fn is_initialized(&self) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name IN (?, ?)",
        )
        .bind(BUILDS_TABLE)
        .bind(TASKS_TABLE)
        .fetch_one(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to inspect schema: {}", e)))?;
        Ok(row.get::<i64, _>("n") == 2)
    }

    /// Health-checks the database and creates the schema if it is missing.
    /// Returns whether anything had to be created.
    pub async fn ensure_initialized(&self) -> AppResult<bool> {
        self.db.health_check().await?;
        if self.is_initialized().await? {
            return Ok(false);
        }
        self.initialize().await?;
        Ok(true)
    }

    pub async fn drop_schema(&self) -> AppResult<()> {
        self.check_reset_allowed()?;
        let _guard = self.maintenance.write().await;
        self.drop_all().await
    }

    /// Drops and recreates everything while holding the maintenance lock throughout.
    pub async fn reinitialize(&self) -> AppResult<()> {
        self.check_reset_allowed()?;
        let _guard = self.maintenance.write().await;
        self.drop_all().await?;
        self.create_all().await
    }

    fn check_reset_allowed(&self) -> AppResult<()> {
        if self.allow_destructive_reset {
            Ok(())
        } else {
            Err(AppError::ConfigurationError(
                "Destructive schema reset is disabled; set SCHEMA_ALLOW_RESET=true to enable it"
                    .to_string(),
            ))
        }
    }

    async fn drop_all(&self) -> AppResult<()> {
        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin schema transaction: {}", e)))?;

        // Child table first so the foreign key never dangles.
        for table in [TASKS_TABLE, BUILDS_TABLE] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to drop {}: {}", table, e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit schema drop: {}", e)))?;
        warn!("Database schema dropped");
        Ok(())
    }
}
