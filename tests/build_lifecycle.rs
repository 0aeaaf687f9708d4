mod common;

use std::time::Duration;

use serde_json::json;

use build_task_service::{
    buildtask::{
        model::FailurePolicy,
        service::{CreateBuildRequest, UpdateTaskRequest},
        BuildStatus, TaskStatus, TaskType,
    },
    AppError,
};
use common::{add, add_at, broken_torch, fill, spawn_app, spawn_app_with_world, torch, SlowWorld};

fn named(name: &str) -> CreateBuildRequest {
    CreateBuildRequest {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_build_executes_tasks_in_order() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;

    let build = service.create_build(named("tower")).await.unwrap();
    assert_eq!(build.status(), BuildStatus::Created);

    let first = service.add_task(build.id, add(TaskType::BlockFill, fill(0, 0, 3, 3))).await.unwrap();
    let second = service.add_task(build.id, add(TaskType::PrefabTorch, torch(1, 66, 1))).await.unwrap();
    assert_eq!((first.task_order, second.task_order), (1, 2));
    assert_eq!(first.status(), TaskStatus::Queued);

    let result = service.execute_build(build.id).await.unwrap();
    assert!(result.success, "{:?}", result);
    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.tasks_executed, 2);
    let orders: Vec<i32> = result.task_results.iter().map(|r| r.task_order).collect();
    assert_eq!(orders, vec![1, 2]);

    let report = service.get_build_status(build.id).await.unwrap();
    assert_eq!(report.build.status(), BuildStatus::Completed);
    assert!(report.build.completed_at().is_some());
    assert_eq!(report.counts.completed, 2);
    assert!(report.tasks.iter().all(|t| t.executed_at().is_some()));
}

#[tokio::test]
async fn test_empty_build_completes() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let build = app.state.service.create_build(named("empty")).await.unwrap();

    let result = app.state.service.execute_build(build.id).await.unwrap();
    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.message, "No tasks to execute");
}

#[tokio::test]
async fn test_continue_policy_runs_everything_and_fails_build() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("walls")).await.unwrap();

    service.add_task(build.id, add(TaskType::PrefabTorch, broken_torch(0, 0))).await.unwrap();
    service.add_task(build.id, add(TaskType::BlockFill, fill(5, 5, 6, 6))).await.unwrap();

    let result = service.execute_build(build.id).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!((result.tasks_executed, result.tasks_failed), (1, 1));

    let tasks = service.list_tasks(build.id).await.unwrap();
    assert_eq!(tasks[0].status(), TaskStatus::Failed);
    assert!(tasks[0].error_message().unwrap().starts_with("Execution failed:"));
    assert_eq!(tasks[1].status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_abort_policy_leaves_later_tasks_queued() {
    let app = spawn_app(FailurePolicy::Abort).await;
    let service = &app.state.service;
    let build = service.create_build(named("abort")).await.unwrap();

    service.add_task(build.id, add(TaskType::PrefabTorch, broken_torch(0, 0))).await.unwrap();
    service.add_task(build.id, add(TaskType::BlockFill, fill(5, 5, 6, 6))).await.unwrap();

    let result = service.execute_build(build.id).await.unwrap();
    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!((result.tasks_failed, result.tasks_skipped), (1, 1));

    let tasks = service.list_tasks(build.id).await.unwrap();
    assert_eq!(tasks[1].status(), TaskStatus::Queued);
    assert!(tasks[1].executed_at().is_none());
}

#[tokio::test]
async fn test_best_effort_policy_completes_despite_failures() {
    let app = spawn_app(FailurePolicy::BestEffort).await;
    let service = &app.state.service;
    let build = service.create_build(named("lenient")).await.unwrap();

    service.add_task(build.id, add(TaskType::PrefabTorch, broken_torch(0, 0))).await.unwrap();
    service.add_task(build.id, add(TaskType::PrefabTorch, torch(2, 64, 2))).await.unwrap();

    let result = service.execute_build(build.id).await.unwrap();
    assert_eq!(result.status, BuildStatus::Completed);
    assert!(!result.success);
    assert_eq!(result.tasks_failed, 1);
}

#[tokio::test]
async fn test_retry_after_fix_only_runs_queued_tasks() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("retry")).await.unwrap();

    let bad = service.add_task(build.id, add(TaskType::PrefabTorch, broken_torch(0, 0))).await.unwrap();
    service.add_task(build.id, add(TaskType::PrefabTorch, torch(3, 64, 3))).await.unwrap();
    let first = service.execute_build(build.id).await.unwrap();
    assert_eq!(first.status, BuildStatus::Failed);

    let fixed = service
        .update_task(
            build.id,
            bad.id,
            UpdateTaskRequest {
                task_data: Some(json!({"block_type": "minecraft:torch"})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(fixed.status(), TaskStatus::Queued);
    assert!(fixed.error_message().is_none());
    assert_eq!(fixed.task_data()["x"], json!(0));

    let second = service.execute_build(build.id).await.unwrap();
    assert_eq!(second.status, BuildStatus::Completed);
    assert_eq!(second.task_results.len(), 1);
    assert_eq!(second.task_results[0].task_id, bad.id);
}

#[tokio::test]
async fn test_completed_build_rejects_changes() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("done")).await.unwrap();
    let task = service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();
    service.execute_build(build.id).await.unwrap();

    let err = service
        .add_task(build.id, add(TaskType::PrefabTorch, torch(1, 64, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = service.execute_build(build.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = service.delete_task(build.id, task.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_add_task_rejects_bad_input() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("strict")).await.unwrap();

    let mut missing = add(TaskType::PrefabTorch, torch(0, 0, 0));
    missing.task_data = None;
    assert!(matches!(
        service.add_task(build.id, missing).await.unwrap_err(),
        AppError::BadRequest(_)
    ));

    let err = service
        .add_task(build.id, add(TaskType::PrefabTorch, json!({"x": 0, "y": 64})))
        .await
        .unwrap_err();
    match err {
        AppError::Validation(msg) => assert!(msg.contains("z is required"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }

    let err = service
        .add_task(uuid::Uuid::new_v4(), add(TaskType::PrefabTorch, torch(0, 64, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(service.list_tasks(build.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_task_positions_stay_contiguous() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("ordering")).await.unwrap();

    let a = service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();
    let b = service.add_task(build.id, add(TaskType::PrefabTorch, torch(1, 64, 0))).await.unwrap();
    let c = service.add_task(build.id, add_at(TaskType::PrefabTorch, torch(2, 64, 0), 1)).await.unwrap();
    assert_eq!(c.task_order, 1);

    let ids: Vec<_> = service.list_tasks(build.id).await.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![c.id, a.id, b.id]);

    service.delete_task(build.id, a.id).await.unwrap();
    let tasks = service.list_tasks(build.id).await.unwrap();
    let orders: Vec<i32> = tasks.iter().map(|t| t.task_order).collect();
    assert_eq!(orders, vec![1, 2]);
    assert_eq!(tasks[1].id, b.id);

    let reordered = service.reorder_tasks(build.id, &[b.id, c.id]).await.unwrap();
    assert_eq!(reordered[0].id, b.id);
    assert_eq!(reordered[0].task_order, 1);

    let err = service.reorder_tasks(build.id, &[b.id]).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_concurrent_execution_is_rejected() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = app.state.service.clone();
    let build = service.create_build(named("race")).await.unwrap();
    for i in 0..20 {
        service
            .add_task(build.id, add(TaskType::BlockFill, fill(i * 4, 0, i * 4 + 3, 3)))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(service.execute_build(build.id), service.execute_build(build.id));
    let outcomes = [a, b];
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AppError::Conflict(_))))
        .count();
    let completed = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(res) if res.status == BuildStatus::Completed))
        .count();
    assert_eq!((conflicts, completed), (1, 1));
}

#[tokio::test]
async fn test_delete_build_removes_tasks() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("gone")).await.unwrap();
    let task = service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();

    service.delete_build(build.id).await.unwrap();
    assert!(service.store().find_task(task.id).await.unwrap().is_none());
    assert!(matches!(
        service.delete_build(build.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_tasks_cannot_be_added_while_executing() {
    let app = spawn_app_with_world(
        FailurePolicy::Continue,
        5,
        Box::new(SlowWorld::new(Duration::from_millis(400))),
    )
    .await;
    let service = app.state.service.clone();
    let build = service.create_build(named("busy")).await.unwrap();
    service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();

    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.execute_build(build.id).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let late = service
        .add_task(build.id, add(TaskType::PrefabTorch, torch(1, 64, 0)))
        .await
        .unwrap_err();
    assert!(matches!(late, AppError::Conflict(_)), "{:?}", late);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, BuildStatus::Completed);
    let tasks = service.list_tasks(build.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_world_timeout_fails_the_task() {
    let app = spawn_app_with_world(
        FailurePolicy::Continue,
        1,
        Box::new(SlowWorld::new(Duration::from_millis(1_500))),
    )
    .await;
    let service = &app.state.service;
    let build = service.create_build(named("slow")).await.unwrap();
    let slow = service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();
    let fast = service.add_task(build.id, add(TaskType::BlockFill, fill(4, 4, 5, 5))).await.unwrap();

    let result = service.execute_build(build.id).await.unwrap();
    assert_eq!(result.tasks_failed, 1);
    assert_eq!(result.tasks_executed, 1);
    assert_eq!(result.status, FailurePolicy::Continue.outcome(1));
    assert_eq!(result.status, BuildStatus::Failed);

    let slow = service.get_task(build.id, slow.id).await.unwrap();
    assert_eq!(slow.status(), TaskStatus::Failed);
    let error = slow.error_message().unwrap();
    assert!(error.contains("timed out"), "{}", error);

    // Queued behind the stalled torch, but still inside its own deadline.
    let fast = service.get_task(build.id, fast.id).await.unwrap();
    assert_eq!(fast.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_storage_failure_mid_run_does_not_strand_tasks() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("flaky")).await.unwrap();
    let task = service.add_task(build.id, add(TaskType::PrefabTorch, torch(0, 64, 0))).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER refuse_completion BEFORE UPDATE ON build_tasks \
         WHEN NEW.status = 'COMPLETED' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(app.state.db.pool().await.unwrap())
    .await
    .unwrap();

    let err = service.execute_build(build.id).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)), "{:?}", err);

    let task = service.get_task(build.id, task.id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error_message().unwrap().starts_with("Execution interrupted"));
    assert_eq!(service.get_build(build.id).await.unwrap().status(), BuildStatus::Failed);
}

#[tokio::test]
async fn test_null_optional_fields_execute() {
    let app = spawn_app(FailurePolicy::Continue).await;
    let service = &app.state.service;
    let build = service.create_build(named("door")).await.unwrap();
    let door = json!({
        "start_x": 0, "start_y": 64, "start_z": 0, "facing": "north",
        "block_type": "minecraft:oak_door", "width": null, "hinge": null
    });
    let task = service.add_task(build.id, add(TaskType::PrefabDoor, door)).await.unwrap();
    let bbox = task.bounding_box().unwrap();
    assert_eq!((bbox.max_x, bbox.max_y), (0, 65));

    let result = service.execute_build(build.id).await.unwrap();
    assert!(result.success, "{:?}", result);
}
