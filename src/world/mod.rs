//! The live world and the single writer that owns it.

pub mod memory;
pub mod writer;

use std::fmt;

use crate::buildtask::requests::{
    BlockSetRequest, DoorRequest, FillBoxRequest, SignRequest, StairRequest, TaskRequest,
    TorchRequest, WindowPaneRequest,
};

pub use memory::InMemoryWorld;
pub use writer::WorldWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    UnknownWorld(String),
    UnknownBlock(String),
    WrongBlockKind { block: String, expected: &'static str },
    OutOfBounds { x: i32, y: i32, z: i32 },
    VolumeTooLarge { volume: i64, limit: i64 },
    Rejected(String),
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::UnknownWorld(world) => write!(f, "Unknown world: {}", world),
            WorldError::UnknownBlock(block) => write!(f, "Unknown block: {}", block),
            WorldError::WrongBlockKind { block, expected } => {
                write!(f, "Block {} is not a {} block", block, expected)
            }
            WorldError::OutOfBounds { x, y, z } => {
                write!(f, "Position ({}, {}, {}) is outside the buildable height", x, y, z)
            }
            WorldError::VolumeTooLarge { volume, limit } => {
                write!(f, "Volume of {} blocks exceeds the limit of {}", volume, limit)
            }
            WorldError::Rejected(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for WorldError {}

/// Primitive world mutations, one per task type.
///
/// Implementations run only on the world writer thread, so they may hold
/// non-thread-safe state and need not synchronize.
pub trait WorldOperations: Send {
    fn set_blocks(&mut self, request: &BlockSetRequest) -> Result<String, WorldError>;
    fn fill_box(&mut self, request: &FillBoxRequest) -> Result<String, WorldError>;
    fn place_door(&mut self, request: &DoorRequest) -> Result<String, WorldError>;
    fn place_stairs(&mut self, request: &StairRequest) -> Result<String, WorldError>;
    fn place_window(&mut self, request: &WindowPaneRequest) -> Result<String, WorldError>;
    fn place_torch(&mut self, request: &TorchRequest) -> Result<String, WorldError>;
    fn place_sign(&mut self, request: &SignRequest) -> Result<String, WorldError>;
}

/// Routes a decoded request to the matching primitive.
pub fn apply(world: &mut dyn WorldOperations, request: &TaskRequest) -> Result<String, WorldError> {
    match request {
        TaskRequest::SetBlocks(r) => world.set_blocks(r),
        TaskRequest::FillBox(r) => world.fill_box(r),
        TaskRequest::Door(r) => world.place_door(r),
        TaskRequest::Stairs(r) => world.place_stairs(r),
        TaskRequest::Window(r) => world.place_window(r),
        TaskRequest::Torch(r) => world.place_torch(r),
        TaskRequest::Sign(r) => world.place_sign(r),
    }
}
