//! Typed task requests handed to the world writer.
//!
//! Payloads are stored and validated as JSON; right before dispatch they are
//! converted into one of these shapes according to the task type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::buildtask::model::TaskType;

/// Cardinal direction used by prefabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Facing {
    North,
    South,
    East,
    West,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::North => "north",
            Facing::South => "south",
            Facing::East => "east",
            Facing::West => "west",
        }
    }

    /// Unit step along which a multi-wide prefab extends: north +X, south -X, east +Z, west -Z.
    pub fn lateral(&self) -> (i32, i32) {
        match self {
            Facing::North => (1, 0),
            Facing::South => (-1, 0),
            Facing::East => (0, 1),
            Facing::West => (0, -1),
        }
    }

    /// Horizontal unit vector pointing the way the prefab faces.
    pub fn forward(&self) -> (i32, i32) {
        match self {
            Facing::North => (0, -1),
            Facing::South => (0, 1),
            Facing::East => (1, 0),
            Facing::West => (-1, 0),
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" => Ok(Facing::North),
            "south" => Ok(Facing::South),
            "east" => Ok(Facing::East),
            "west" => Ok(Facing::West),
            _ => Err(format!("facing must be one of: north, south, east, west (got '{}')", s)),
        }
    }
}

impl TryFrom<String> for Facing {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Facing> for String {
    fn from(value: Facing) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Hinge {
    #[default]
    Left,
    Right,
}

impl Hinge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hinge::Left => "left",
            Hinge::Right => "right",
        }
    }

    pub fn flipped(&self) -> Hinge {
        match self {
            Hinge::Left => Hinge::Right,
            Hinge::Right => Hinge::Left,
        }
    }
}

impl FromStr for Hinge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Hinge::Left),
            "right" => Ok(Hinge::Right),
            _ => Err(format!("hinge must be 'left' or 'right' (got '{}')", s)),
        }
    }
}

impl TryFrom<String> for Hinge {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Hinge> for String {
    fn from(value: Hinge) -> Self {
        value.as_str().to_string()
    }
}

/// One cell of a BLOCK_SET array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockCell {
    Name(String),
    Detailed {
        #[serde(alias = "blockName")]
        block_name: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
}

impl BlockCell {
    pub fn block_name(&self) -> &str {
        match self {
            BlockCell::Name(name) => name,
            BlockCell::Detailed { block_name, .. } => block_name,
        }
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        match self {
            BlockCell::Name(_) => None,
            BlockCell::Detailed { properties, .. } => Some(properties),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSetRequest {
    #[serde(alias = "startX")]
    pub start_x: i32,
    #[serde(alias = "startY")]
    pub start_y: i32,
    #[serde(alias = "startZ")]
    pub start_z: i32,
    /// Indexed `[x][y][z]` relative to the start corner.
    pub blocks: Vec<Vec<Vec<Option<BlockCell>>>>,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillBoxRequest {
    pub x1: i32,
    pub y1: i32,
    pub z1: i32,
    pub x2: i32,
    pub y2: i32,
    pub z2: i32,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(default)]
    pub world: Option<String>,
}

fn default_width() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorRequest {
    #[serde(alias = "startX")]
    pub start_x: i32,
    #[serde(alias = "startY")]
    pub start_y: i32,
    #[serde(alias = "startZ")]
    pub start_z: i32,
    pub facing: Facing,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default)]
    pub hinge: Hinge,
    #[serde(default)]
    pub open: bool,
    #[serde(default, alias = "doubleDoors")]
    pub double_doors: bool,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StairRequest {
    #[serde(alias = "startX")]
    pub start_x: i32,
    #[serde(alias = "startY")]
    pub start_y: i32,
    #[serde(alias = "startZ")]
    pub start_z: i32,
    #[serde(alias = "endX")]
    pub end_x: i32,
    #[serde(alias = "endY")]
    pub end_y: i32,
    #[serde(alias = "endZ")]
    pub end_z: i32,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(alias = "stairType")]
    pub stair_type: String,
    #[serde(alias = "staircaseDirection")]
    pub staircase_direction: Facing,
    #[serde(default, alias = "fillSupport")]
    pub fill_support: bool,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPaneRequest {
    #[serde(alias = "startX")]
    pub start_x: i32,
    #[serde(alias = "startY")]
    pub start_y: i32,
    #[serde(alias = "startZ")]
    pub start_z: i32,
    #[serde(alias = "endX")]
    pub end_x: i32,
    #[serde(alias = "endZ")]
    pub end_z: i32,
    pub height: i32,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(default)]
    pub waterlogged: bool,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorchRequest {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(default)]
    pub facing: Option<Facing>,
    #[serde(default)]
    pub world: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(alias = "blockType")]
    pub block_type: String,
    #[serde(default, alias = "frontLines")]
    pub front_lines: Vec<String>,
    #[serde(default, alias = "backLines")]
    pub back_lines: Vec<String>,
    #[serde(default)]
    pub facing: Option<Facing>,
    #[serde(default)]
    pub rotation: Option<i32>,
    #[serde(default)]
    pub glowing: bool,
    #[serde(default)]
    pub world: Option<String>,
}

/// Copies `value` with every null-valued object key removed, so optional
/// fields fall back to their defaults. Nulls inside arrays are kept.
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

/// A payload decoded for its task type.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    SetBlocks(BlockSetRequest),
    FillBox(FillBoxRequest),
    Door(DoorRequest),
    Stairs(StairRequest),
    Window(WindowPaneRequest),
    Torch(TorchRequest),
    Sign(SignRequest),
}

impl TaskRequest {
    pub fn from_payload(task_type: TaskType, data: &Value) -> Result<Self, String> {
        fn decode<T: serde::de::DeserializeOwned>(
            task_type: TaskType,
            data: &Value,
        ) -> Result<T, String> {
            serde_json::from_value(without_nulls(data))
                .map_err(|e| format!("Failed to parse {} task data: {}", task_type, e))
        }

        Ok(match task_type {
            TaskType::BlockSet => TaskRequest::SetBlocks(decode(task_type, data)?),
            TaskType::BlockFill => TaskRequest::FillBox(decode(task_type, data)?),
            TaskType::PrefabDoor => TaskRequest::Door(decode(task_type, data)?),
            TaskType::PrefabStairs => TaskRequest::Stairs(decode(task_type, data)?),
            TaskType::PrefabWindow => TaskRequest::Window(decode(task_type, data)?),
            TaskType::PrefabTorch => TaskRequest::Torch(decode(task_type, data)?),
            TaskType::PrefabSign => TaskRequest::Sign(decode(task_type, data)?),
        })
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskRequest::SetBlocks(_) => TaskType::BlockSet,
            TaskRequest::FillBox(_) => TaskType::BlockFill,
            TaskRequest::Door(_) => TaskType::PrefabDoor,
            TaskRequest::Stairs(_) => TaskType::PrefabStairs,
            TaskRequest::Window(_) => TaskType::PrefabWindow,
            TaskRequest::Torch(_) => TaskType::PrefabTorch,
            TaskRequest::Sign(_) => TaskType::PrefabSign,
        }
    }

    pub fn world(&self) -> Option<&str> {
        match self {
            TaskRequest::SetBlocks(r) => r.world.as_deref(),
            TaskRequest::FillBox(r) => r.world.as_deref(),
            TaskRequest::Door(r) => r.world.as_deref(),
            TaskRequest::Stairs(r) => r.world.as_deref(),
            TaskRequest::Window(r) => r.world.as_deref(),
            TaskRequest::Torch(r) => r.world.as_deref(),
            TaskRequest::Sign(r) => r.world.as_deref(),
        }
    }
}
