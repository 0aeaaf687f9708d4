// Storage infrastructure
pub mod database;     // Lazily-initialized SQLite pool with leak detection
pub mod schema;       // Transactional schema management
pub mod build_store;  // Build and task persistence, location index

pub use build_store::{BuildFilter, BuildStore, SqliteBuildStore};
pub use database::{DatabasePool, PoolStats, TrackedConnection};
pub use schema::SchemaManager;
