pub mod bounding_box;
pub mod executor;
pub mod model;
pub mod payload;
pub mod requests;
pub mod service;
pub mod validator;

pub use bounding_box::{derive_bounding_box, BoundingBox};
pub use executor::{TaskExecutionResult, TaskExecutor};
pub use model::{Build, BuildStatus, BuildTask, FailurePolicy, LocationQuery, TaskStatus, TaskType};
pub use service::BuildService;
pub use validator::{validate_task_data, ValidationResult};
