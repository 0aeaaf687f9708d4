use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Sqlite;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool handle.
///
/// The pool is created on first use, exactly once even under concurrent
/// first callers. Owners pass the handle to collaborators explicitly and call
/// [`DatabasePool::shutdown`] when done.
pub struct DatabasePool {
    config: DatabaseConfig,
    pool: OnceCell<SqlitePool>,
    initializations: AtomicUsize,
    leak_warnings: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl DatabasePool {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
            initializations: AtomicUsize::new(0),
            leak_warnings: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn is_in_memory(&self) -> bool {
        self.config.url.contains(":memory:") || self.config.url.contains("mode=memory")
    }

    pub async fn pool(&self) -> AppResult<&SqlitePool> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> AppResult<SqlitePool> {
        let in_memory = self.is_in_memory();
        if !in_memory {
            ensure_parent_dir(&self.config.url)?;
        }

        let mut options = SqliteConnectOptions::from_str(&self.config.url)
            .map_err(|e| {
                AppError::ConfigurationError(format!(
                    "Invalid database url {}: {}",
                    self.config.url, e
                ))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly one.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(self.config.max_connections)
                .min_connections(self.config.min_connections.min(self.config.max_connections))
                .idle_timeout(self.config.idle_timeout())
                .max_lifetime(self.config.max_lifetime())
        };

        let pool = pool_options
            .acquire_timeout(self.config.acquire_timeout())
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

        let count = self.initializations.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            url = %self.config.url,
            max_connections = pool.options().get_max_connections(),
            initializations = count,
            "Database pool initialized"
        );
        Ok(pool)
    }

    /// Checks out a connection that reports itself if held past the leak threshold.
    pub async fn acquire(&self) -> AppResult<TrackedConnection> {
        let conn = self.pool().await?.acquire().await?;
        let threshold = self.config.leak_detection_threshold();
        let warnings = self.leak_warnings.clone();
        let acquired_at = Instant::now();

        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            warnings.fetch_add(1, Ordering::SeqCst);
            warn!(
                held_ms = acquired_at.elapsed().as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Database connection held past leak threshold; probable connection leak"
            );
        });

        Ok(TrackedConnection {
            conn,
            watchdog,
            acquired_at,
        })
    }

    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    /// `None` until the pool has been created.
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.get().map(|pool| PoolStats {
            size: pool.size(),
            idle: pool.num_idle(),
            max_connections: pool.options().get_max_connections(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn leak_warning_count(&self) -> usize {
        self.leak_warnings.load(Ordering::SeqCst)
    }

    /// Closes every connection. Later calls to `pool()` fail with a closed-pool error.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!("Database pool closed");
        }
    }

    /// Closes and forgets the pool so the next use builds a fresh one.
    /// Meant for tests; requires exclusive access to the handle.
    pub async fn reset(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Database pool reset");
        }
    }
}

fn ensure_parent_dir(url: &str) -> AppResult<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::ConfigurationError(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// A pooled connection with a leak watchdog attached.
pub struct TrackedConnection {
    conn: PoolConnection<Sqlite>,
    watchdog: JoinHandle<()>,
    acquired_at: Instant,
}

impl TrackedConnection {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Deref for TrackedConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TrackedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}
