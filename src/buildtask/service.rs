use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::buildtask::executor::{TaskExecutionResult, TaskExecutor};
use crate::buildtask::model::{
    Build, BuildStatus, BuildTask, FailurePolicy, LocationQuery, TaskStatus, TaskType,
};
use crate::buildtask::validator::validate_task_data;
use crate::error::{AppError, AppResult};
use crate::infrastructure::build_store::{BuildFilter, BuildStore};
use crate::infrastructure::schema::SchemaManager;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBuildRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTaskRequest {
    #[serde(default, alias = "taskType")]
    pub task_type: Option<TaskType>,
    #[serde(default, alias = "taskData")]
    pub task_data: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    /// 1-based insert position; appended when absent.
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default, alias = "taskType")]
    pub task_type: Option<TaskType>,
    /// Merged key by key into the stored payload; `null` values remove keys.
    #[serde(default, alias = "taskData")]
    pub task_data: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub queued: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    fn from_tasks(tasks: &[BuildTask]) -> Self {
        let mut counts = TaskCounts {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status() {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Executing => counts.executing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildStatusReport {
    pub build: Build,
    pub tasks: Vec<BuildTask>,
    pub counts: TaskCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildExecutionResult {
    pub build_id: Uuid,
    pub status: BuildStatus,
    pub success: bool,
    pub policy: FailurePolicy,
    pub tasks_executed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub message: String,
    pub task_results: Vec<TaskExecutionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildLocationMatch {
    pub build: Build,
    pub intersecting_tasks: Vec<BuildTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationQueryResult {
    pub area: LocationQuery,
    pub builds: Vec<BuildLocationMatch>,
    pub build_count: usize,
    pub task_count: usize,
}

/// Releases a build's execution slot when dropped.
struct ExecutionClaim<'a> {
    running: &'a Mutex<HashSet<Uuid>>,
    build_id: Uuid,
}

impl Drop for ExecutionClaim<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.build_id);
    }
}

pub struct BuildService {
    store: Arc<dyn BuildStore>,
    executor: TaskExecutor,
    schema: Arc<SchemaManager>,
    policy: FailurePolicy,
    running: Mutex<HashSet<Uuid>>,
}

impl BuildService {
    pub fn new(
        store: Arc<dyn BuildStore>,
        executor: TaskExecutor,
        schema: Arc<SchemaManager>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            executor,
            schema,
            policy,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    pub async fn create_build(&self, request: CreateBuildRequest) -> AppResult<Build> {
        let build = Build::new(request.name, request.description, request.world);
        self.store.create_build(&build).await?;
        info!(build_id = %build.id, world = %build.world, "Build created");
        Ok(build)
    }

    pub async fn get_build(&self, build_id: Uuid) -> AppResult<Build> {
        self.store
            .find_build(build_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Build {} not found", build_id)))
    }

    pub async fn get_build_status(&self, build_id: Uuid) -> AppResult<BuildStatusReport> {
        let build = self.get_build(build_id).await?;
        let tasks = self.store.list_tasks(build_id).await?;
        let counts = TaskCounts::from_tasks(&tasks);
        Ok(BuildStatusReport {
            build,
            tasks,
            counts,
        })
    }

    pub async fn list_builds(&self, filter: &BuildFilter) -> AppResult<Vec<Build>> {
        self.store.list_builds(filter).await
    }

    pub async fn delete_build(&self, build_id: Uuid) -> AppResult<()> {
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is executing and cannot be deleted",
                build_id
            )));
        }
        if !self.store.delete_build(build_id).await? {
            return Err(AppError::NotFound(format!("Build {} not found", build_id)));
        }
        info!(build_id = %build_id, "Build deleted");
        Ok(())
    }

    async fn modifiable_build(&self, build_id: Uuid) -> AppResult<Build> {
        let build = self.get_build(build_id).await?;
        if build.is_completed() {
            return Err(AppError::Conflict(format!(
                "Build {} is completed and can no longer be modified",
                build_id
            )));
        }
        Ok(build)
    }

    fn validate(task_type: Option<TaskType>, data: Option<&Value>) -> AppResult<()> {
        let result = validate_task_data(task_type, data);
        if result.is_valid() {
            return Ok(());
        }
        let message = result.error_message.unwrap_or_default();
        // Missing type or payload is a malformed request rather than a bad payload.
        if task_type.is_none() || data.map_or(true, Value::is_null) {
            Err(AppError::BadRequest(message))
        } else {
            Err(AppError::Validation(message))
        }
    }

    #[instrument(skip_all, fields(build_id = %build_id))]
    pub async fn add_task(&self, build_id: Uuid, request: AddTaskRequest) -> AppResult<BuildTask> {
        self.modifiable_build(build_id).await?;
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is executing; tasks cannot be added",
                build_id
            )));
        }
        Self::validate(request.task_type, request.task_data.as_ref())?;
        let (Some(task_type), Some(task_data)) = (request.task_type, request.task_data) else {
            return Err(AppError::BadRequest("Task type and data are required".to_string()));
        };

        let mut task = BuildTask::new(build_id, 0, task_type, task_data, request.description);
        match request.position {
            Some(position) => self.store.insert_task_at(&mut task, position).await?,
            None => self.store.append_task(&mut task).await?,
        }
        info!(task_id = %task.id, order = task.task_order, task_type = %task_type, "Task added");
        Ok(task)
    }

    pub async fn list_tasks(&self, build_id: Uuid) -> AppResult<Vec<BuildTask>> {
        self.get_build(build_id).await?;
        self.store.list_tasks(build_id).await
    }

    pub async fn get_task(&self, build_id: Uuid, task_id: Uuid) -> AppResult<BuildTask> {
        self.store
            .find_task(task_id)
            .await?
            .filter(|task| task.build_id == build_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Task {} not found in build {}", task_id, build_id))
            })
    }

    /// Applies a partial update. A changed type or payload puts the task back in the queue.
    #[instrument(skip_all, fields(build_id = %build_id, task_id = %task_id))]
    pub async fn update_task(
        &self,
        build_id: Uuid,
        task_id: Uuid,
        request: UpdateTaskRequest,
    ) -> AppResult<BuildTask> {
        self.modifiable_build(build_id).await?;
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is executing; tasks cannot be edited",
                build_id
            )));
        }
        let mut task = self.get_task(build_id, task_id).await?;

        let definition_changed = request.task_type.is_some() || request.task_data.is_some();
        if definition_changed {
            let task_type = request.task_type.unwrap_or(task.task_type());
            let mut task_data = task.task_data().clone();
            if let Some(patch) = &request.task_data {
                merge_payload(&mut task_data, patch)?;
            }
            Self::validate(Some(task_type), Some(&task_data))?;
            task.redefine(task_type, task_data);
            task.requeue();
        }
        if let Some(description) = request.description {
            task.description = Some(description);
        }

        self.store.update_task(&task).await?;
        info!(requeued = definition_changed, "Task updated");
        Ok(task)
    }

    pub async fn delete_task(&self, build_id: Uuid, task_id: Uuid) -> AppResult<()> {
        self.modifiable_build(build_id).await?;
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is executing; tasks cannot be removed",
                build_id
            )));
        }
        self.get_task(build_id, task_id).await?;
        self.store.delete_task(task_id).await?;
        info!(build_id = %build_id, task_id = %task_id, "Task deleted");
        Ok(())
    }

    pub async fn reorder_tasks(&self, build_id: Uuid, ordered: &[Uuid]) -> AppResult<Vec<BuildTask>> {
        self.modifiable_build(build_id).await?;
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is executing; tasks cannot be reordered",
                build_id
            )));
        }
        self.store.reorder_tasks(build_id, ordered).await?;
        self.store.list_tasks(build_id).await
    }

    fn is_running(&self, build_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&build_id)
    }

    fn claim_execution(&self, build_id: Uuid) -> AppResult<ExecutionClaim<'_>> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is already executing",
                build_id
            )));
        }
        Ok(ExecutionClaim {
            running: &self.running,
            build_id,
        })
    }

    /// Fails fast on anything that would make `execute_build` reject the build.
    pub async fn check_executable(&self, build_id: Uuid) -> AppResult<Build> {
        let build = self.get_build(build_id).await?;
        if build.is_completed() {
            return Err(AppError::Conflict(format!(
                "Build {} is already completed",
                build_id
            )));
        }
        if self.is_running(build_id) {
            return Err(AppError::Conflict(format!(
                "Build {} is already executing",
                build_id
            )));
        }
        Ok(build)
    }

    /// Runs the build's queued tasks in order and settles its final status.
    #[instrument(skip_all, fields(build_id = %build_id, policy = %self.policy))]
    pub async fn execute_build(&self, build_id: Uuid) -> AppResult<BuildExecutionResult> {
        let _permit = self.schema.execution_permit().await;
        let _claim = self.claim_execution(build_id)?;

        let mut build = self.get_build(build_id).await?;
        if build.is_completed() {
            return Err(AppError::Conflict(format!(
                "Build {} is already completed",
                build_id
            )));
        }

        build.set_status(BuildStatus::InProgress);
        self.store.update_build(&build).await?;
        info!("Build execution started");

        match self.run_tasks(&mut build).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, "Build execution aborted by storage error");
                self.fail_interrupted_tasks(build_id, &e).await;
                build.set_status(BuildStatus::Failed);
                if let Err(store_err) = self.store.update_build(&build).await {
                    error!(error = %store_err, "Failed to record build failure");
                }
                Err(e)
            }
        }
    }

    /// Marks tasks left `EXECUTING` by an aborted run as failed so a later edit or run can pick them up.
    async fn fail_interrupted_tasks(&self, build_id: Uuid, cause: &AppError) {
        let stuck = match self
            .store
            .list_tasks_by_status(build_id, TaskStatus::Executing)
            .await
        {
            Ok(stuck) => stuck,
            Err(e) => {
                error!(error = %e, "Failed to look up interrupted tasks");
                return;
            }
        };
        let reason = format!("Execution interrupted: {}", cause);
        for task in stuck {
            if let Err(e) = self
                .store
                .update_task_status(task.id, TaskStatus::Failed, Some(&reason))
                .await
            {
                error!(task_id = %task.id, error = %e, "Failed to mark interrupted task");
            }
        }
    }

    async fn run_tasks(&self, build: &mut Build) -> AppResult<BuildExecutionResult> {
        let mut task_results = Vec::new();
        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut stopped = false;

        // Re-read after each pass so a task that lands mid-run is executed too.
        let tasks = loop {
            let mut tasks = self.store.list_tasks(build.id).await?;
            let mut ran = false;

            for task in tasks.iter_mut() {
                if task.status() != TaskStatus::Queued || attempted.contains(&task.id) {
                    continue;
                }
                if stopped {
                    break;
                }
                attempted.insert(task.id);
                ran = true;

                let result = match self.executor.prepare(task) {
                    Ok(request) => {
                        self.store
                            .update_task_status(task.id, TaskStatus::Executing, None)
                            .await?;
                        self.executor.dispatch(task, request).await
                    }
                    Err(result) => result,
                };
                self.store.update_task(task).await?;

                if result.success {
                    executed += 1;
                } else {
                    failed += 1;
                    if self.policy.stops_on_failure() {
                        warn!(task_id = %task.id, "Stopping build after failed task");
                        stopped = true;
                    }
                }
                task_results.push(result);
            }

            if stopped || !ran {
                break tasks;
            }
        };

        let unfinished = tasks
            .iter()
            .filter(|t| t.status() != TaskStatus::Completed)
            .count();
        let skipped = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Queued)
            .count();
        let status = if tasks.is_empty() {
            BuildStatus::Completed
        } else {
            self.policy.outcome(unfinished)
        };

        build.set_status(status);
        self.store.update_build(build).await?;

        let message = if tasks.is_empty() {
            "No tasks to execute".to_string()
        } else if failed == 0 && unfinished == 0 {
            format!("All {} tasks executed successfully", executed)
        } else {
            format!(
                "{} tasks executed, {} failed, {} not run",
                executed, failed, skipped
            )
        };
        info!(status = %status, executed, failed, skipped, "Build execution finished");

        Ok(BuildExecutionResult {
            build_id: build.id,
            status,
            success: failed == 0 && unfinished == 0,
            policy: self.policy,
            tasks_executed: executed,
            tasks_failed: failed,
            tasks_skipped: skipped,
            message,
            task_results,
        })
    }

    /// Builds with at least one task box overlapping the rectangle on X/Z, oldest first.
    pub async fn query_by_location(&self, area: LocationQuery) -> AppResult<LocationQueryResult> {
        if area.is_inverted() {
            return Err(AppError::BadRequest(format!(
                "Invalid area: min ({}, {}) exceeds max ({}, {})",
                area.min_x, area.min_z, area.max_x, area.max_z
            )));
        }

        let tasks = self.store.find_tasks_in_area(&area).await?;
        let mut order: Vec<Uuid> = Vec::new();
        let mut by_build: HashMap<Uuid, Vec<BuildTask>> = HashMap::new();
        for task in tasks {
            if !by_build.contains_key(&task.build_id) {
                order.push(task.build_id);
            }
            by_build.entry(task.build_id).or_default().push(task);
        }

        let builds = self.store.find_builds(&order).await?;
        let task_count = by_build.values().map(Vec::len).sum();
        let matches: Vec<BuildLocationMatch> = builds
            .into_iter()
            .map(|build| BuildLocationMatch {
                intersecting_tasks: by_build.remove(&build.id).unwrap_or_default(),
                build,
            })
            .collect();

        Ok(LocationQueryResult {
            area,
            build_count: matches.len(),
            task_count,
            builds: matches,
        })
    }
}

/// Shallow merge of `patch` into `target`; `null` in the patch deletes the key.
fn merge_payload(target: &mut Value, patch: &Value) -> AppResult<()> {
    let Some(patch) = patch.as_object() else {
        return Err(AppError::BadRequest(
            "Task data update must be a JSON object".to_string(),
        ));
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Some(target) = target.as_object_mut() {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}
