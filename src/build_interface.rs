// HTTP surface over the build service

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    buildtask::{
        model::LocationQuery,
        service::{AddTaskRequest, CreateBuildRequest, UpdateTaskRequest},
    },
    error::{AppError, AppResult},
    infrastructure::build_store::BuildFilter,
};

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<Json<Value>> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| AppError::SerializationError(format!("Failed to serialize response: {}", e)))
}

#[derive(Deserialize)]
pub struct ExecuteParams {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    #[serde(alias = "taskIds")]
    pub task_ids: Vec<Uuid>,
}

// HTTP Handlers

pub async fn create_build_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateBuildRequest>,
) -> AppResult<Response> {
    let build = state.service.create_build(req).await?;
    Ok((StatusCode::CREATED, to_json(&build)?).into_response())
}

pub async fn list_builds_handler(
    State(state): State<AppState>,
    Query(filter): Query<BuildFilter>,
) -> AppResult<Json<Value>> {
    let builds = state.service.list_builds(&filter).await?;
    Ok(Json(json!({ "count": builds.len(), "builds": builds })))
}

pub async fn get_build_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> AppResult<Json<Value>> {
    to_json(&state.service.get_build_status(id).await?)
}

pub async fn delete_build_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> AppResult<StatusCode> {
    state.service.delete_build(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_task_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<AddTaskRequest>,
) -> AppResult<Response> {
    let task = state.service.add_task(id, req).await?;
    Ok((StatusCode::CREATED, to_json(&task)?).into_response())
}

pub async fn list_tasks_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> AppResult<Json<Value>> {
    let tasks = state.service.list_tasks(id).await?;
    Ok(Json(json!({ "build_id": id, "count": tasks.len(), "tasks": tasks })))
}

pub async fn reorder_tasks_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<ReorderRequest>,
) -> AppResult<Json<Value>> {
    let tasks = state.service.reorder_tasks(id, &req.task_ids).await?;
    Ok(Json(json!({ "build_id": id, "count": tasks.len(), "tasks": tasks })))
}

pub async fn get_task_handler(
    State(state): State<AppState>,
    AxumPath((id, task_id)): AxumPath<(Uuid, Uuid)>,
) -> AppResult<Json<Value>> {
    to_json(&state.service.get_task(id, task_id).await?)
}

pub async fn update_task_handler(
    State(state): State<AppState>,
    AxumPath((id, task_id)): AxumPath<(Uuid, Uuid)>,
    Json(req): Json<UpdateTaskRequest>,
) -> AppResult<Json<Value>> {
    to_json(&state.service.update_task(id, task_id, req).await?)
}

pub async fn delete_task_handler(
    State(state): State<AppState>,
    AxumPath((id, task_id)): AxumPath<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.service.delete_task(id, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs in the background and answers 202 unless `?wait=true`.
pub async fn execute_build_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
    Query(params): Query<ExecuteParams>,
) -> AppResult<Response> {
    if params.wait {
        let result = state.service.execute_build(id).await?;
        return Ok(to_json(&result)?.into_response());
    }

    state.service.check_executable(id).await?;
    let service = state.service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.execute_build(id).await {
            error!(build_id = %id, error = %e, "Background build execution failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "build_id": id,
            "status": "accepted",
            "message": "Build execution started"
        })),
    )
        .into_response())
}

pub async fn query_location_handler(
    State(state): State<AppState>,
    Json(query): Json<LocationQuery>,
) -> AppResult<Json<Value>> {
    to_json(&state.service.query_by_location(query).await?)
}

pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.db.health_check().await?;
    let schema_ready = state.schema.is_initialized().await?;
    Ok(Json(json!({
        "status": "ok",
        "schema_initialized": schema_ready,
        "world_writer_running": state.writer.is_running(),
        "pool": state.db.stats(),
        "failure_policy": state.service.policy(),
    })))
}

pub fn create_build_router(state: AppState) -> Router {
    Router::new()
        // Builds
        .route("/builds", post(create_build_handler).get(list_builds_handler))
        .route("/builds/query-location", post(query_location_handler))
        .route("/builds/{id}", get(get_build_handler).delete(delete_build_handler))
        .route("/builds/{id}/execute", post(execute_build_handler))

        // Tasks
        .route(
            "/builds/{id}/tasks",
            post(add_task_handler)
                .get(list_tasks_handler)
                .put(reorder_tasks_handler),
        )
        .route(
            "/builds/{id}/tasks/{task_id}",
            get(get_task_handler)
                .patch(update_task_handler)
                .delete(delete_task_handler),
        )

        .route("/health", get(health_handler))
        .with_state(state)
}
