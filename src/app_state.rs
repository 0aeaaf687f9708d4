use std::sync::Arc;

use crate::{
    buildtask::{executor::TaskExecutor, service::BuildService},
    config::Config,
    error::AppResult,
    infrastructure::{build_store::SqliteBuildStore, database::DatabasePool, schema::SchemaManager},
    world::{InMemoryWorld, WorldOperations, WorldWriter},
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BuildService>,
    pub db: Arc<DatabasePool>,
    pub schema: Arc<SchemaManager>,
    pub writer: Arc<WorldWriter>,
    pub config: Config,
}

impl AppState {
    /// Wires the service against the in-memory reference world.
    pub async fn new(config: Config) -> AppResult<Self> {
        Self::with_world(config, Box::new(InMemoryWorld::new())).await
    }

    pub async fn with_world(config: Config, world: Box<dyn WorldOperations>) -> AppResult<Self> {
        let db = Arc::new(DatabasePool::new(config.database.clone()));
        let schema = Arc::new(SchemaManager::new(
            db.clone(),
            config.schema.allow_destructive_reset,
        ));
        schema.ensure_initialized().await?;

        let writer = Arc::new(WorldWriter::spawn(
            world,
            config.execution.world_queue_capacity,
            config.execution.world_timeout(),
        )?);
        let store = Arc::new(SqliteBuildStore::new(db.clone()));
        let service = Arc::new(BuildService::new(
            store,
            TaskExecutor::new(writer.clone()),
            schema.clone(),
            config.execution.failure_policy,
        ));

        Ok(Self {
            service,
            db,
            schema,
            writer,
            config,
        })
    }

    pub async fn shutdown(&self) {
        self.db.shutdown().await;
    }
}
