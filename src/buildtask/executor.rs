use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buildtask::model::{BuildTask, TaskStatus};
use crate::buildtask::requests::TaskRequest;
use crate::buildtask::validator::validate_task_data;
use crate::world::WorldWriter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskExecutionResult {
    pub task_id: Uuid,
    pub task_order: i32,
    pub success: bool,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskExecutionResult {
    fn completed(task: &BuildTask, message: String) -> Self {
        Self {
            task_id: task.id,
            task_order: task.task_order,
            success: true,
            status: task.status(),
            message: Some(message),
            error: None,
        }
    }

    fn failed(task: &BuildTask) -> Self {
        Self {
            task_id: task.id,
            task_order: task.task_order,
            success: false,
            status: task.status(),
            message: None,
            error: task.error_message().map(str::to_string),
        }
    }
}

/// Runs one task at a time through the world writer.
///
/// Execution never returns an error: every failure ends up on the task as
/// `FAILED` with a message and is reported in the result.
#[derive(Clone)]
pub struct TaskExecutor {
    writer: Arc<WorldWriter>,
}

impl TaskExecutor {
    pub fn new(writer: Arc<WorldWriter>) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &Arc<WorldWriter> {
        &self.writer
    }

    pub async fn execute_task(&self, task: &mut BuildTask) -> TaskExecutionResult {
        match self.prepare(task) {
            Ok(request) => self.dispatch(task, request).await,
            Err(result) => result,
        }
    }

    /// Validates and decodes the payload, leaving the task `EXECUTING` on success.
    /// On failure the task is already `FAILED` and the error result is returned.
    pub fn prepare(&self, task: &mut BuildTask) -> Result<TaskRequest, TaskExecutionResult> {
        let validation = validate_task_data(Some(task.task_type()), Some(task.task_data()));
        if !validation.is_valid() {
            let reason = validation.error_message.unwrap_or_default();
            warn!(task_id = %task.id, task_type = %task.task_type(), %reason, "Task data validation failed");
            task.mark_failed(format!("Task data validation failed: {}", reason));
            return Err(TaskExecutionResult::failed(task));
        }

        task.mark_executing();
        match TaskRequest::from_payload(task.task_type(), task.task_data()) {
            Ok(request) => Ok(request),
            Err(reason) => {
                warn!(task_id = %task.id, %reason, "Task payload conversion failed");
                task.mark_failed(reason);
                Err(TaskExecutionResult::failed(task))
            }
        }
    }

    /// Hands a prepared request to the world writer and records the outcome on the task.
    pub async fn dispatch(&self, task: &mut BuildTask, request: TaskRequest) -> TaskExecutionResult {
        debug!(task_id = %task.id, task_type = %task.task_type(), order = task.task_order, "Executing task");

        match self.writer.execute(request).await {
            Ok(Ok(summary)) => {
                task.mark_completed();
                info!(task_id = %task.id, %summary, "Task completed");
                TaskExecutionResult::completed(task, summary)
            }
            Ok(Err(world_error)) => {
                warn!(task_id = %task.id, error = %world_error, "World rejected task");
                task.mark_failed(format!("Execution failed: {}", world_error));
                TaskExecutionResult::failed(task)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Task dispatch failed");
                task.mark_failed(e.to_string());
                TaskExecutionResult::failed(task)
            }
        }
    }
}
