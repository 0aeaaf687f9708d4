// Build task orchestration service

// Build and task model, validation, execution and orchestration
pub mod buildtask;

// Storage - connection pool, schema management and the build store
pub mod infrastructure;

// The live world and its single writer
pub mod world;

// Wiring and HTTP surface
pub mod app_state;
pub mod build_interface;
pub mod config;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
