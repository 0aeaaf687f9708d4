#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use build_task_service::{
    app_state::AppState,
    buildtask::{model::FailurePolicy, service::AddTaskRequest, TaskType},
    buildtask::requests::{
        BlockSetRequest, DoorRequest, FillBoxRequest, SignRequest, StairRequest, TorchRequest,
        WindowPaneRequest,
    },
    config::Config,
    infrastructure::{DatabasePool, SchemaManager, SqliteBuildStore},
    world::{InMemoryWorld, WorldError, WorldOperations},
};

/// Application wired against a throwaway database file.
pub struct TestApp {
    pub state: AppState,
    _dir: TempDir,
}

pub async fn spawn_app(policy: FailurePolicy) -> TestApp {
    spawn_app_with_world(policy, 5, Box::new(InMemoryWorld::new())).await
}

pub async fn spawn_app_with_world(
    policy: FailurePolicy,
    world_timeout_secs: u64,
    world: Box<dyn WorldOperations>,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("builds.db").display());
    let mut config = Config::with_database_url(url);
    config.execution.failure_policy = policy;
    config.execution.world_timeout_secs = world_timeout_secs;
    config.schema.allow_destructive_reset = true;

    let state = AppState::with_world(config, world).await.unwrap();
    TestApp { state, _dir: dir }
}

/// In-memory world whose torches take `torch_delay` to place.
pub struct SlowWorld {
    inner: InMemoryWorld,
    torch_delay: Duration,
}

impl SlowWorld {
    pub fn new(torch_delay: Duration) -> Self {
        Self {
            inner: InMemoryWorld::new(),
            torch_delay,
        }
    }
}

impl WorldOperations for SlowWorld {
    fn set_blocks(&mut self, request: &BlockSetRequest) -> Result<String, WorldError> {
        self.inner.set_blocks(request)
    }
    fn fill_box(&mut self, request: &FillBoxRequest) -> Result<String, WorldError> {
        self.inner.fill_box(request)
    }
    fn place_door(&mut self, request: &DoorRequest) -> Result<String, WorldError> {
        self.inner.place_door(request)
    }
    fn place_stairs(&mut self, request: &StairRequest) -> Result<String, WorldError> {
        self.inner.place_stairs(request)
    }
    fn place_window(&mut self, request: &WindowPaneRequest) -> Result<String, WorldError> {
        self.inner.place_window(request)
    }
    fn place_torch(&mut self, request: &TorchRequest) -> Result<String, WorldError> {
        std::thread::sleep(self.torch_delay);
        self.inner.place_torch(request)
    }
    fn place_sign(&mut self, request: &SignRequest) -> Result<String, WorldError> {
        self.inner.place_sign(request)
    }
}

pub struct TestStore {
    pub store: SqliteBuildStore,
    pub db: Arc<DatabasePool>,
    _dir: TempDir,
}

pub async fn spawn_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("store.db").display());
    let db = Arc::new(DatabasePool::new(
        build_task_service::config::DatabaseConfig::with_url(url),
    ));
    SchemaManager::new(db.clone(), false).initialize().await.unwrap();
    TestStore {
        store: SqliteBuildStore::new(db.clone()),
        db,
        _dir: dir,
    }
}

pub fn fill(x1: i32, z1: i32, x2: i32, z2: i32) -> Value {
    json!({
        "x1": x1, "y1": 64, "z1": z1,
        "x2": x2, "y2": 65, "z2": z2,
        "block_type": "minecraft:stone"
    })
}

pub fn torch(x: i32, y: i32, z: i32) -> Value {
    json!({"x": x, "y": y, "z": z, "block_type": "minecraft:torch"})
}

/// Passes validation but the world refuses it: stone is not a torch.
pub fn broken_torch(x: i32, z: i32) -> Value {
    json!({"x": x, "y": 64, "z": z, "block_type": "minecraft:stone"})
}

pub fn add(task_type: TaskType, data: Value) -> AddTaskRequest {
    AddTaskRequest {
        task_type: Some(task_type),
        task_data: Some(data),
        description: None,
        position: None,
    }
}

pub fn add_at(task_type: TaskType, data: Value, position: i32) -> AddTaskRequest {
    AddTaskRequest {
        position: Some(position),
        ..add(task_type, data)
    }
}
