use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Connection, QueryBuilder, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::buildtask::model::{Build, BuildStatus, BuildTask, LocationQuery, TaskStatus, TaskType};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::DatabasePool;

const BUILD_COLUMNS: &str = "id, name, description, status, world, created_at, completed_at";
const TASK_COLUMNS: &str = "t.id, t.build_id, t.task_order, t.task_type, t.task_data, t.status, \
     t.executed_at, t.error_message, t.description";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BuildFilter {
    #[serde(default)]
    pub world: Option<String>,
    #[serde(default)]
    pub status: Option<BuildStatus>,
}

/// Durable storage for builds and their ordered tasks.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn create_build(&self, build: &Build) -> AppResult<()>;
    async fn find_build(&self, id: Uuid) -> AppResult<Option<Build>>;
    async fn find_builds(&self, ids: &[Uuid]) -> AppResult<Vec<Build>>;
    async fn update_build(&self, build: &Build) -> AppResult<()>;
    /// Removes the build and, by cascade, its tasks. Returns whether a row was deleted.
    async fn delete_build(&self, id: Uuid) -> AppResult<bool>;
    async fn list_builds(&self, filter: &BuildFilter) -> AppResult<Vec<Build>>;
    async fn count_builds(&self, filter: &BuildFilter) -> AppResult<i64>;
    async fn build_exists(&self, id: Uuid) -> AppResult<bool>;

    /// Stores `task` after the build's last task; the assigned order is written back.
    async fn append_task(&self, task: &mut BuildTask) -> AppResult<()>;
    /// Stores `task` at `position` (1-based, clamped), shifting later tasks down.
    async fn insert_task_at(&self, task: &mut BuildTask, position: i32) -> AppResult<()>;
    async fn find_task(&self, id: Uuid) -> AppResult<Option<BuildTask>>;
    async fn list_tasks(&self, build_id: Uuid) -> AppResult<Vec<BuildTask>>;
    async fn list_tasks_by_status(&self, build_id: Uuid, status: TaskStatus) -> AppResult<Vec<BuildTask>>;
    async fn update_task(&self, task: &BuildTask) -> AppResult<()>;
    async fn update_task_status(&self, id: Uuid, status: TaskStatus, error: Option<&str>) -> AppResult<()>;
    /// Deletes a task and closes the gap it leaves in the order.
    async fn delete_task(&self, id: Uuid) -> AppResult<bool>;
    /// Rewrites task orders to follow `ordered`, which must list every task of the build once.
    async fn reorder_tasks(&self, build_id: Uuid, ordered: &[Uuid]) -> AppResult<()>;
    async fn count_tasks(&self, build_id: Uuid, status: Option<TaskStatus>) -> AppResult<i64>;

    /// Tasks whose box overlaps the query rectangle on X/Z, grouped by build in creation order.
    async fn find_tasks_in_area(&self, area: &LocationQuery) -> AppResult<Vec<BuildTask>>;
    async fn find_builds_in_area(&self, area: &LocationQuery) -> AppResult<Vec<Build>>;
}

pub struct SqliteBuildStore {
    db: Arc<DatabasePool>,
    // Serializes statements that renumber a build's tasks.
    order_lock: Mutex<()>,
}

impl SqliteBuildStore {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        Self {
            db,
            order_lock: Mutex::new(()),
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AppError::DatabaseError(format!("Invalid stored timestamp: {}", ms)))
}

fn parse_uuid(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::DatabaseError(format!("Invalid stored id {}: {}", raw, e)))
}

fn build_from_row(row: &SqliteRow) -> AppResult<Build> {
    let status: String = row.get("status");
    Ok(Build::restore(
        parse_uuid(row.get::<&str, _>("id"))?,
        row.get("name"),
        row.get("description"),
        row.get("world"),
        status.parse().map_err(AppError::DatabaseError)?,
        from_millis(row.get("created_at"))?,
        row.get::<Option<i64>, _>("completed_at")
            .map(from_millis)
            .transpose()?,
    ))
}

fn task_from_row(row: &SqliteRow) -> AppResult<BuildTask> {
    let id = parse_uuid(row.get::<&str, _>("id"))?;
    let task_type: TaskType = row
        .get::<&str, _>("task_type")
        .parse()
        .map_err(|e| AppError::DatabaseError(format!("Corrupt task {}: {}", id, e)))?;
    let task_data = serde_json::from_str(row.get::<&str, _>("task_data")).map_err(|e| {
        AppError::SerializationError(format!("Corrupt payload for task {}: {}", id, e))
    })?;
    let status: TaskStatus = row
        .get::<&str, _>("status")
        .parse()
        .map_err(|e| AppError::DatabaseError(format!("Corrupt task {}: {}", id, e)))?;

    Ok(BuildTask::restore(
        id,
        parse_uuid(row.get::<&str, _>("build_id"))?,
        row.get::<i64, _>("task_order") as i32,
        task_type,
        task_data,
        status,
        row.get::<Option<i64>, _>("executed_at")
            .map(from_millis)
            .transpose()?,
        row.get("error_message"),
        row.get("description"),
    ))
}

fn payload_text(task: &BuildTask) -> AppResult<String> {
    serde_json::to_string(task.task_data()).map_err(|e| {
        AppError::SerializationError(format!("Failed to serialize payload for task {}: {}", task.id, e))
    })
}

fn push_overlap(qb: &mut QueryBuilder<'_, Sqlite>, area: &LocationQuery) {
    qb.push("t.min_x IS NOT NULL AND t.min_x <= ");
    qb.push_bind(area.max_x);
    qb.push(" AND t.max_x >= ");
    qb.push_bind(area.min_x);
    qb.push(" AND t.min_z <= ");
    qb.push_bind(area.max_z);
    qb.push(" AND t.max_z >= ");
    qb.push_bind(area.min_z);
}

fn push_build_filters(qb: &mut QueryBuilder<'_, Sqlite>, world: Option<&str>, status: Option<BuildStatus>) {
    if let Some(world) = world {
        qb.push(" AND b.world = ");
        qb.push_bind(world.to_string());
    }
    if let Some(status) = status {
        qb.push(" AND b.status = ");
        qb.push_bind(status.as_str());
    }
}

#[async_trait]
impl BuildStore for SqliteBuildStore {
    async fn create_build(&self, build: &Build) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO builds (id, name, description, status, world, created_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(build.id.to_string())
        .bind(&build.name)
        .bind(&build.description)
        .bind(build.status().as_str())
        .bind(&build.world)
        .bind(to_millis(build.created_at))
        .bind(build.completed_at().map(to_millis))
        .execute(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create build {}: {}", build.id, e)))?;
        debug!(build_id = %build.id, "Build stored");
        Ok(())
    }

    async fn find_build(&self, id: Uuid) -> AppResult<Option<Build>> {
        let row = sqlx::query(&format!("SELECT {} FROM builds WHERE id = ?", BUILD_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get build {}: {}", id, e)))?;
        row.as_ref().map(build_from_row).transpose()
    }

    async fn find_builds(&self, ids: &[Uuid]) -> AppResult<Vec<Build>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM builds WHERE id IN (", BUILD_COLUMNS));
        let mut separated = qb.separated(",");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        qb.push(") ORDER BY created_at ASC, id ASC");

        let rows = qb
            .build()
            .fetch_all(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get builds: {}", e)))?;
        rows.iter().map(build_from_row).collect()
    }

    async fn update_build(&self, build: &Build) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET name = ?, description = ?, status = ?, world = ?, completed_at = ? \
             WHERE id = ?",
        )
        .bind(&build.name)
        .bind(&build.description)
        .bind(build.status().as_str())
        .bind(&build.world)
        .bind(build.completed_at().map(to_millis))
        .bind(build.id.to_string())
        .execute(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update build {}: {}", build.id, e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Build {} not found", build.id)));
        }
        Ok(())
    }

    async fn delete_build(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete build {}: {}", id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_builds(&self, filter: &BuildFilter) -> AppResult<Vec<Build>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM builds b WHERE 1 = 1", BUILD_COLUMNS));
        push_build_filters(&mut qb, filter.world.as_deref(), filter.status);
        qb.push(" ORDER BY created_at DESC, id ASC");

        let rows = qb
            .build()
            .fetch_all(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list builds: {}", e)))?;
        rows.iter().map(build_from_row).collect()
    }

    async fn count_builds(&self, filter: &BuildFilter) -> AppResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM builds b WHERE 1 = 1");
        push_build_filters(&mut qb, filter.world.as_deref(), filter.status);

        let row = qb
            .build()
            .fetch_one(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count builds: {}", e)))?;
        Ok(row.get("n"))
    }

    async fn build_exists(&self, id: Uuid) -> AppResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM builds WHERE id = ?) AS present")
            .bind(id.to_string())
            .fetch_one(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to check build {}: {}", id, e)))?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    async fn append_task(&self, task: &mut BuildTask) -> AppResult<()> {
        let payload = payload_text(task)?;
        let bbox = task.bounding_box();
        let _ordering = self.order_lock.lock().await;

        // Order assignment and insert happen in one statement.
        let row = sqlx::query(
            r#"
            INSERT INTO build_tasks (
                id, build_id, task_order, task_type, task_data, status, executed_at,
                error_message, description, created_at,
                min_x, min_y, min_z, max_x, max_y, max_z
            )
            SELECT ?, ?, COALESCE(MAX(task_order), 0) + 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            FROM build_tasks WHERE build_id = ?
            RETURNING task_order
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.build_id.to_string())
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(task.status().as_str())
        .bind(task.executed_at().map(to_millis))
        .bind(task.error_message())
        .bind(&task.description)
        .bind(to_millis(Utc::now()))
        .bind(bbox.map(|b| b.min_x))
        .bind(bbox.map(|b| b.min_y))
        .bind(bbox.map(|b| b.min_z))
        .bind(bbox.map(|b| b.max_x))
        .bind(bbox.map(|b| b.max_y))
        .bind(bbox.map(|b| b.max_z))
        .bind(task.build_id.to_string())
        .fetch_one(self.db.pool().await?)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!("Failed to append task to build {}: {}", task.build_id, e))
        })?;

        task.task_order = row.get::<i64, _>("task_order") as i32;
        debug!(build_id = %task.build_id, task_id = %task.id, order = task.task_order, "Task appended");
        Ok(())
    }

    async fn insert_task_at(&self, task: &mut BuildTask, position: i32) -> AppResult<()> {
        let payload = payload_text(task)?;
        let bbox = task.bounding_box();
        let build_id = task.build_id.to_string();
        let position = position.max(1);
        let _ordering = self.order_lock.lock().await;

        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        // Two passes through negative values keep UNIQUE(build_id, task_order) intact mid-update.
        sqlx::query(
            "UPDATE build_tasks SET task_order = -(task_order + 1) WHERE build_id = ? AND task_order >= ?",
        )
        .bind(&build_id)
        .bind(position)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to shift tasks: {}", e)))?;
        sqlx::query("UPDATE build_tasks SET task_order = -task_order WHERE build_id = ? AND task_order < 0")
            .bind(&build_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to shift tasks: {}", e)))?;

        let existing: i64 = sqlx::query("SELECT COUNT(*) AS n FROM build_tasks WHERE build_id = ?")
            .bind(&build_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count tasks: {}", e)))?
            .get("n");
        let order = i64::from(position).min(existing + 1) as i32;

        sqlx::query(
            r#"
            INSERT INTO build_tasks (
                id, build_id, task_order, task_type, task_data, status, executed_at,
                error_message, description, created_at,
                min_x, min_y, min_z, max_x, max_y, max_z
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&build_id)
        .bind(order)
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(task.status().as_str())
        .bind(task.executed_at().map(to_millis))
        .bind(task.error_message())
        .bind(&task.description)
        .bind(to_millis(Utc::now()))
        .bind(bbox.map(|b| b.min_x))
        .bind(bbox.map(|b| b.min_y))
        .bind(bbox.map(|b| b.min_z))
        .bind(bbox.map(|b| b.max_x))
        .bind(bbox.map(|b| b.max_y))
        .bind(bbox.map(|b| b.max_z))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert task: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit task insert: {}", e)))?;

        task.task_order = order;
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> AppResult<Option<BuildTask>> {
        let row = sqlx::query(&format!("SELECT {} FROM build_tasks t WHERE t.id = ?", TASK_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get task {}: {}", id, e)))?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, build_id: Uuid) -> AppResult<Vec<BuildTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM build_tasks t WHERE t.build_id = ? ORDER BY t.task_order ASC",
            TASK_COLUMNS
        ))
        .bind(build_id.to_string())
        .fetch_all(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list tasks for build {}: {}", build_id, e)))?;
        rows.iter().map(task_from_row).collect()
    }

    async fn list_tasks_by_status(&self, build_id: Uuid, status: TaskStatus) -> AppResult<Vec<BuildTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM build_tasks t WHERE t.build_id = ? AND t.status = ? ORDER BY t.task_order ASC",
            TASK_COLUMNS
        ))
        .bind(build_id.to_string())
        .bind(status.as_str())
        .fetch_all(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list tasks for build {}: {}", build_id, e)))?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_task(&self, task: &BuildTask) -> AppResult<()> {
        let payload = payload_text(task)?;
        let bbox = task.bounding_box();
        let result = sqlx::query(
            r#"
            UPDATE build_tasks SET
                task_type = ?, task_data = ?, status = ?, executed_at = ?, error_message = ?,
                description = ?, min_x = ?, min_y = ?, min_z = ?, max_x = ?, max_y = ?, max_z = ?
            WHERE id = ?
            "#,
        )
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(task.status().as_str())
        .bind(task.executed_at().map(to_millis))
        .bind(task.error_message())
        .bind(&task.description)
        .bind(bbox.map(|b| b.min_x))
        .bind(bbox.map(|b| b.min_y))
        .bind(bbox.map(|b| b.min_z))
        .bind(bbox.map(|b| b.max_x))
        .bind(bbox.map(|b| b.max_y))
        .bind(bbox.map(|b| b.max_z))
        .bind(task.id.to_string())
        .execute(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update task {}: {}", task.id, e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }
        Ok(())
    }

    async fn update_task_status(&self, id: Uuid, status: TaskStatus, error: Option<&str>) -> AppResult<()> {
        let executed_at = matches!(status, TaskStatus::Completed | TaskStatus::Failed)
            .then(|| to_millis(Utc::now()));
        let result = sqlx::query(
            "UPDATE build_tasks SET status = ?, error_message = ?, executed_at = COALESCE(?, executed_at) \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(executed_at)
        .bind(id.to_string())
        .execute(self.db.pool().await?)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update status of task {}: {}", id, e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", id)));
        }
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> AppResult<bool> {
        let _ordering = self.order_lock.lock().await;
        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let removed = sqlx::query("DELETE FROM build_tasks WHERE id = ? RETURNING build_id, task_order")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete task {}: {}", id, e)))?;

        let Some(removed) = removed else {
            return Ok(false);
        };
        let build_id: String = removed.get("build_id");
        let order: i64 = removed.get("task_order");

        sqlx::query(
            "UPDATE build_tasks SET task_order = -(task_order - 1) WHERE build_id = ? AND task_order > ?",
        )
        .bind(&build_id)
        .bind(order)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to renumber tasks: {}", e)))?;
        sqlx::query("UPDATE build_tasks SET task_order = -task_order WHERE build_id = ? AND task_order < 0")
            .bind(&build_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to renumber tasks: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit task delete: {}", e)))?;
        Ok(true)
    }

    async fn reorder_tasks(&self, build_id: Uuid, ordered: &[Uuid]) -> AppResult<()> {
        let _ordering = self.order_lock.lock().await;

        let current: HashSet<Uuid> = self.list_tasks(build_id).await?.into_iter().map(|t| t.id).collect();
        let requested: HashSet<Uuid> = ordered.iter().copied().collect();
        if requested.len() != ordered.len() || requested != current {
            return Err(AppError::BadRequest(format!(
                "Reorder must list each of the {} tasks of build {} exactly once",
                current.len(),
                build_id
            )));
        }

        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        for (index, task_id) in ordered.iter().enumerate() {
            sqlx::query("UPDATE build_tasks SET task_order = ? WHERE id = ?")
                .bind(-(index as i64 + 1))
                .bind(task_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to reorder task {}: {}", task_id, e)))?;
        }
        sqlx::query("UPDATE build_tasks SET task_order = -task_order WHERE build_id = ? AND task_order < 0")
            .bind(build_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to reorder tasks: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit reorder: {}", e)))?;
        Ok(())
    }

    async fn count_tasks(&self, build_id: Uuid, status: Option<TaskStatus>) -> AppResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM build_tasks WHERE build_id = ");
        qb.push_bind(build_id.to_string());
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }

        let row = qb
            .build()
            .fetch_one(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count tasks: {}", e)))?;
        Ok(row.get("n"))
    }

    async fn find_tasks_in_area(&self, area: &LocationQuery) -> AppResult<Vec<BuildTask>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM build_tasks t JOIN builds b ON b.id = t.build_id WHERE ",
            TASK_COLUMNS
        ));
        push_overlap(&mut qb, area);
        push_build_filters(&mut qb, area.world.as_deref(), area.status);
        qb.push(" ORDER BY b.created_at ASC, b.id ASC, t.task_order ASC");

        let rows = qb
            .build()
            .fetch_all(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to query tasks by location: {}", e)))?;
        rows.iter().map(task_from_row).collect()
    }

    async fn find_builds_in_area(&self, area: &LocationQuery) -> AppResult<Vec<Build>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM builds b WHERE EXISTS (SELECT 1 FROM build_tasks t WHERE t.build_id = b.id AND ",
            BUILD_COLUMNS
        ));
        push_overlap(&mut qb, area);
        qb.push(")");
        push_build_filters(&mut qb, area.world.as_deref(), area.status);
        qb.push(" ORDER BY b.created_at ASC, b.id ASC");

        let rows = qb
            .build()
            .fetch_all(self.db.pool().await?)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to query builds by location: {}", e)))?;
        rows.iter().map(build_from_row).collect()
    }
}
