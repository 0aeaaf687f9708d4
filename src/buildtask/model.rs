use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::buildtask::bounding_box::{derive_bounding_box, BoundingBox};

pub const DEFAULT_WORLD: &str = "minecraft:overworld";

/// Closed set of spatial operations a task can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    BlockSet,
    BlockFill,
    PrefabDoor,
    PrefabStairs,
    PrefabWindow,
    PrefabTorch,
    PrefabSign,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::BlockSet,
        TaskType::BlockFill,
        TaskType::PrefabDoor,
        TaskType::PrefabStairs,
        TaskType::PrefabWindow,
        TaskType::PrefabTorch,
        TaskType::PrefabSign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::BlockSet => "BLOCK_SET",
            TaskType::BlockFill => "BLOCK_FILL",
            TaskType::PrefabDoor => "PREFAB_DOOR",
            TaskType::PrefabStairs => "PREFAB_STAIRS",
            TaskType::PrefabWindow => "PREFAB_WINDOW",
            TaskType::PrefabTorch => "PREFAB_TORCH",
            TaskType::PrefabSign => "PREFAB_SIGN",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("Unknown task type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Created => "CREATED",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Completed => "COMPLETED",
            BuildStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(BuildStatus::Created),
            "IN_PROGRESS" => Ok(BuildStatus::InProgress),
            "COMPLETED" => Ok(BuildStatus::Completed),
            "FAILED" => Ok(BuildStatus::Failed),
            _ => Err(format!("Unknown build status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(TaskStatus::Queued),
            "EXECUTING" => Ok(TaskStatus::Executing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// How one failed task affects the remainder of its build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure. Later tasks stay queued and the build fails.
    Abort,
    /// Run every task. The build fails if any task failed.
    #[default]
    Continue,
    /// Run every task. The build completes even when some tasks failed.
    BestEffort,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Continue => "continue",
            FailurePolicy::BestEffort => "best_effort",
        }
    }

    pub fn stops_on_failure(&self) -> bool {
        matches!(self, FailurePolicy::Abort)
    }

    /// Final build status given the number of tasks not completed after a run.
    pub fn outcome(&self, unfinished: usize) -> BuildStatus {
        match self {
            FailurePolicy::BestEffort => BuildStatus::Completed,
            FailurePolicy::Abort | FailurePolicy::Continue if unfinished > 0 => BuildStatus::Failed,
            FailurePolicy::Abort | FailurePolicy::Continue => BuildStatus::Completed,
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            "best_effort" => Ok(FailurePolicy::BestEffort),
            other => Err(format!(
                "Unknown failure policy '{}', expected one of: abort, continue, best_effort",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub world: String,
    pub created_at: DateTime<Utc>,
    status: BuildStatus,
    completed_at: Option<DateTime<Utc>>,
}

impl Build {
    pub fn new(name: Option<String>, description: Option<String>, world: Option<String>) -> Self {
        let world = world
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| DEFAULT_WORLD.to_string());

        Self {
            id: Uuid::new_v4(),
            name,
            description,
            world,
            created_at: Utc::now(),
            status: BuildStatus::Created,
            completed_at: None,
        }
    }

    /// Rebuilds a build from stored columns.
    pub fn restore(
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
        world: String,
        status: BuildStatus,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            world,
            created_at,
            status,
            completed_at,
        }
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// The completion timestamp is stamped on the first entry into COMPLETED only.
    pub fn set_status(&mut self, status: BuildStatus) {
        if status == BuildStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.status = status;
    }

    pub fn is_completed(&self) -> bool {
        self.status == BuildStatus::Completed
    }
}

/// One spatial operation within a build.
///
/// The bounding box is derived from `(task_type, task_data)` and has no
/// setter of its own; every path that changes either input recomputes it.
#[derive(Debug, Clone, Serialize)]
pub struct BuildTask {
    pub id: Uuid,
    pub build_id: Uuid,
    pub task_order: i32,
    pub description: Option<String>,
    task_type: TaskType,
    task_data: Value,
    status: TaskStatus,
    executed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    bounding_box: Option<BoundingBox>,
}

impl BuildTask {
    pub fn new(
        build_id: Uuid,
        task_order: i32,
        task_type: TaskType,
        task_data: Value,
        description: Option<String>,
    ) -> Self {
        let bounding_box = derive_bounding_box(task_type, &task_data);
        Self {
            id: Uuid::new_v4(),
            build_id,
            task_order,
            description,
            task_type,
            task_data,
            status: TaskStatus::Queued,
            executed_at: None,
            error_message: None,
            bounding_box,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        build_id: Uuid,
        task_order: i32,
        task_type: TaskType,
        task_data: Value,
        status: TaskStatus,
        executed_at: Option<DateTime<Utc>>,
        error_message: Option<String>,
        description: Option<String>,
    ) -> Self {
        let bounding_box = derive_bounding_box(task_type, &task_data);
        Self {
            id,
            build_id,
            task_order,
            description,
            task_type,
            task_data,
            status,
            executed_at,
            error_message,
            bounding_box,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn task_data(&self) -> &Value {
        &self.task_data
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box
    }

    pub fn set_task_type(&mut self, task_type: TaskType) {
        self.task_type = task_type;
        self.refresh_bounding_box();
    }

    pub fn set_task_data(&mut self, task_data: Value) {
        self.task_data = task_data;
        self.refresh_bounding_box();
    }

    /// Replaces type and payload together, deriving the box once.
    pub fn redefine(&mut self, task_type: TaskType, task_data: Value) {
        self.task_type = task_type;
        self.task_data = task_data;
        self.refresh_bounding_box();
    }

    fn refresh_bounding_box(&mut self) {
        self.bounding_box = derive_bounding_box(self.task_type, &self.task_data);
    }

    pub fn mark_executing(&mut self) {
        self.status = TaskStatus::Executing;
        self.error_message = None;
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.error_message = None;
        self.executed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(error.into());
        self.executed_at = Some(Utc::now());
    }

    /// Puts a finished task back in the queue, e.g. after its payload was edited.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Queued;
        self.error_message = None;
        self.executed_at = None;
    }
}

/// Rectangle in the X/Z plane used by location queries. Y is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationQuery {
    #[serde(alias = "minX")]
    pub min_x: i32,
    #[serde(alias = "minZ")]
    pub min_z: i32,
    #[serde(alias = "maxX")]
    pub max_x: i32,
    #[serde(alias = "maxZ")]
    pub max_z: i32,
    /// `None` searches every world.
    #[serde(default)]
    pub world: Option<String>,
    #[serde(default)]
    pub status: Option<BuildStatus>,
}

impl LocationQuery {
    pub fn new(min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
            world: None,
            status: None,
        }
    }

    pub fn in_world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }

    pub fn is_inverted(&self) -> bool {
        self.min_x > self.max_x || self.min_z > self.max_z
    }
}
