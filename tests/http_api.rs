mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use build_task_service::{build_interface::create_build_router, buildtask::model::FailurePolicy};
use common::{fill, spawn_app, torch, TestApp};

fn router(app: &TestApp) -> Router {
    Router::new().nest("/api", create_build_router(app.state.clone()))
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_build_flow_over_http() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let router = router(&app);

    let (status, build) = call(&router, Method::POST, "/api/builds", Some(json!({"name": "hut"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(build["status"], "CREATED");
    assert_eq!(build["world"], "minecraft:overworld");
    let id = build["id"].as_str().unwrap().to_string();

    let (status, task) = call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/tasks", id),
        Some(json!({"taskType": "BLOCK_FILL", "taskData": fill(0, 0, 2, 2)})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", task);
    assert_eq!(task["task_order"], 1);
    assert_eq!(task["status"], "QUEUED");

    let (status, result) = call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/execute?wait=true", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(result["tasks_executed"], 1);

    let (status, report) = call(&router, Method::GET, &format!("/api/builds/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["build"]["status"], "COMPLETED");
    assert_eq!(report["counts"]["completed"], 1);

    let (status, _) = call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/execute", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_background_execution_is_accepted() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let router = router(&app);

    let (_, build) = call(&router, Method::POST, "/api/builds", Some(json!({}))).await;
    let id = build["id"].as_str().unwrap().to_string();
    call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/tasks", id),
        Some(json!({"task_type": "PREFAB_TORCH", "task_data": torch(0, 64, 0)})),
    )
    .await;

    let (status, body) = call(&router, Method::POST, &format!("/api/builds/{}/execute", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["build_id"], id.as_str());

    let mut settled = false;
    for _ in 0..50 {
        let (_, report) = call(&router, Method::GET, &format!("/api/builds/{}", id), None).await;
        if report["build"]["status"] == "COMPLETED" {
            settled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(settled);
}

#[tokio::test]
async fn test_error_responses() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let router = router(&app);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = call(&router, Method::GET, &format!("/api/builds/{}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (_, build) = call(&router, Method::POST, "/api/builds", Some(json!({"name": "x"}))).await;
    let id = build["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/tasks", id),
        Some(json!({"task_type": "PREFAB_SIGN", "task_data": {"x": 0, "y": 64, "z": 0, "block_type": "minecraft:oak_sign", "rotation": 42}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("rotation must be between 0 and 15"));

    let (status, _) = call(
        &router,
        Method::POST,
        "/api/builds/query-location",
        Some(json!({"minX": 10, "minZ": 0, "maxX": 0, "maxZ": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_editing_over_http() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let router = router(&app);

    let (_, build) = call(&router, Method::POST, "/api/builds", Some(json!({"name": "edit"}))).await;
    let id = build["id"].as_str().unwrap().to_string();
    let tasks_uri = format!("/api/builds/{}/tasks", id);

    let (_, a) = call(&router, Method::POST, &tasks_uri, Some(json!({"task_type": "PREFAB_TORCH", "task_data": torch(0, 64, 0)}))).await;
    let (_, b) = call(&router, Method::POST, &tasks_uri, Some(json!({"task_type": "PREFAB_TORCH", "task_data": torch(1, 64, 0)}))).await;
    let (a_id, b_id) = (a["id"].as_str().unwrap(), b["id"].as_str().unwrap());

    let (status, updated) = call(
        &router,
        Method::PATCH,
        &format!("{}/{}", tasks_uri, a_id),
        Some(json!({"task_data": {"x": 7}, "description": "moved"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["task_data"]["x"], 7);
    assert_eq!(updated["description"], "moved");

    let (status, listed) = call(&router, Method::PUT, &tasks_uri, Some(json!({"task_ids": [b_id, a_id]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["tasks"][0]["id"], b_id);

    let (status, _) = call(&router, Method::DELETE, &format!("{}/{}", tasks_uri, b_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listed) = call(&router, Method::GET, &tasks_uri, None).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["tasks"][0]["task_order"], 1);
}

#[tokio::test]
async fn test_location_query_over_http() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let router = router(&app);

    let (_, build) = call(&router, Method::POST, "/api/builds", Some(json!({"name": "plaza"}))).await;
    let id = build["id"].as_str().unwrap().to_string();
    call(
        &router,
        Method::POST,
        &format!("/api/builds/{}/tasks", id),
        Some(json!({"task_type": "BLOCK_FILL", "task_data": fill(0, 0, 8, 8)})),
    )
    .await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/builds/query-location",
        Some(json!({"min_x": 4, "min_z": 4, "max_x": 30, "max_z": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["build_count"], 1);
    assert_eq!(body["builds"][0]["build"]["id"], id.as_str());
    assert_eq!(body["builds"][0]["intersecting_tasks"][0]["bounding_box"]["max_x"], 8);

    let (_, body) = call(
        &router,
        Method::POST,
        "/api/builds/query-location",
        Some(json!({"min_x": 9, "min_z": 9, "max_x": 30, "max_z": 30})),
    )
    .await;
    assert_eq!(body["build_count"], 0);
}

#[tokio::test]
async fn test_health_reports_pool_and_schema() {
    let app = spawn_app(FailurePolicy::BestEffort).await;
    let (status, body) = call(&router(&app), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema_initialized"], true);
    assert_eq!(body["world_writer_running"], true);
    assert_eq!(body["failure_policy"], "best_effort");
}
