use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use crate::buildtask::model::DEFAULT_WORLD;
use crate::buildtask::requests::{
    BlockSetRequest, DoorRequest, Facing, FillBoxRequest, SignRequest, StairRequest,
    TorchRequest, WindowPaneRequest,
};
use crate::world::{WorldError, WorldOperations};

pub const MIN_BUILD_Y: i32 = -64;
pub const MAX_BUILD_Y: i32 = 319;
/// Most blocks a single request may touch.
pub const MAX_PLACEMENT_VOLUME: i64 = 32_768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedBlock {
    pub block: String,
    pub properties: BTreeMap<String, String>,
}

impl PlacedBlock {
    fn plain(block: &str) -> Self {
        Self {
            block: block.to_string(),
            properties: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignText {
    pub front: Vec<String>,
    pub back: Vec<String>,
    pub glowing: bool,
}

/// Block storage keyed by dimension and position.
///
/// Stands in for a live server: it checks block kinds, build height and
/// dimension names, and records what was placed so callers can inspect it.
pub struct InMemoryWorld {
    dimensions: HashSet<String>,
    namespaces: HashSet<String>,
    blocks: HashMap<String, HashMap<BlockPos, PlacedBlock>>,
    signs: HashMap<(String, BlockPos), SignText>,
}

impl Default for InMemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorld {
    pub fn new() -> Self {
        let dimensions = [DEFAULT_WORLD, "minecraft:the_nether", "minecraft:the_end"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            dimensions,
            namespaces: HashSet::from(["minecraft".to_string()]),
            blocks: HashMap::new(),
            signs: HashMap::new(),
        }
    }

    pub fn register_dimension(&mut self, world: impl Into<String>) {
        self.dimensions.insert(world.into());
    }

    pub fn register_namespace(&mut self, namespace: impl Into<String>) {
        self.namespaces.insert(namespace.into());
    }

    pub fn block_at(&self, world: &str, x: i32, y: i32, z: i32) -> Option<&PlacedBlock> {
        self.blocks.get(world)?.get(&BlockPos::new(x, y, z))
    }

    pub fn sign_at(&self, world: &str, x: i32, y: i32, z: i32) -> Option<&SignText> {
        self.signs.get(&(world.to_string(), BlockPos::new(x, y, z)))
    }

    pub fn block_count(&self, world: &str) -> usize {
        self.blocks.get(world).map(HashMap::len).unwrap_or(0)
    }

    fn dimension(&self, world: Option<&str>) -> Result<String, WorldError> {
        let world = world.unwrap_or(DEFAULT_WORLD);
        if self.dimensions.contains(world) {
            Ok(world.to_string())
        } else {
            Err(WorldError::UnknownWorld(world.to_string()))
        }
    }

    fn known_block(&self, block: &str) -> Result<(), WorldError> {
        match block.split_once(':') {
            Some((namespace, path)) if self.namespaces.contains(namespace) && !path.is_empty() => {
                Ok(())
            }
            _ => Err(WorldError::UnknownBlock(block.to_string())),
        }
    }

    fn block_of_kind(&self, block: &str, kind: &'static str) -> Result<(), WorldError> {
        self.known_block(block)?;
        if block.contains(kind) {
            Ok(())
        } else {
            Err(WorldError::WrongBlockKind {
                block: block.to_string(),
                expected: kind,
            })
        }
    }

    fn in_height(pos: BlockPos) -> Result<BlockPos, WorldError> {
        if (MIN_BUILD_Y..=MAX_BUILD_Y).contains(&pos.y) {
            Ok(pos)
        } else {
            Err(WorldError::OutOfBounds {
                x: pos.x,
                y: pos.y,
                z: pos.z,
            })
        }
    }

    fn within_volume(volume: i64) -> Result<(), WorldError> {
        if volume > MAX_PLACEMENT_VOLUME {
            Err(WorldError::VolumeTooLarge {
                volume,
                limit: MAX_PLACEMENT_VOLUME,
            })
        } else {
            Ok(())
        }
    }

    fn offset(base: i32, delta: i64) -> Result<i32, WorldError> {
        i32::try_from(i64::from(base) + delta)
            .map_err(|_| WorldError::Rejected("Coordinate overflow".to_string()))
    }

    /// Applies a batch of placements atomically: nothing is written if any position is invalid.
    fn commit(&mut self, world: &str, placements: Vec<(BlockPos, PlacedBlock)>) -> Result<usize, WorldError> {
        for (pos, _) in &placements {
            Self::in_height(*pos)?;
        }
        let count = placements.len();
        let blocks = self.blocks.entry(world.to_string()).or_default();
        for (pos, block) in placements {
            blocks.insert(pos, block);
        }
        Ok(count)
    }
}

fn span(a: i32, b: i32) -> i64 {
    i64::from(b) - i64::from(a) + 1
}

fn property_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl WorldOperations for InMemoryWorld {
    fn set_blocks(&mut self, request: &BlockSetRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        let cells: usize = request.blocks.iter().flatten().map(Vec::len).sum();
        Self::within_volume(i64::try_from(cells).unwrap_or(i64::MAX))?;
        let mut placements = Vec::new();
        let mut skipped = 0usize;

        for (x, plane) in request.blocks.iter().enumerate() {
            for (y, column) in plane.iter().enumerate() {
                for (z, cell) in column.iter().enumerate() {
                    let Some(cell) = cell else {
                        skipped += 1;
                        continue;
                    };
                    self.known_block(cell.block_name())?;
                    let pos = BlockPos::new(
                        Self::offset(request.start_x, x as i64)?,
                        Self::offset(request.start_y, y as i64)?,
                        Self::offset(request.start_z, z as i64)?,
                    );
                    let mut block = PlacedBlock::plain(cell.block_name());
                    if let Some(properties) = cell.properties() {
                        for (key, value) in properties {
                            block = block.with(key, property_string(value));
                        }
                    }
                    placements.push((pos, block));
                }
            }
        }

        let placed = self.commit(&world, placements)?;
        Ok(format!("Set {} blocks ({} cells left unchanged)", placed, skipped))
    }

    fn fill_box(&mut self, request: &FillBoxRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.known_block(&request.block_type)?;

        let (x0, x1) = (request.x1.min(request.x2), request.x1.max(request.x2));
        let (y0, y1) = (request.y1.min(request.y2), request.y1.max(request.y2));
        let (z0, z1) = (request.z1.min(request.z2), request.z1.max(request.z2));
        let volume = span(x0, x1)
            .saturating_mul(span(y0, y1))
            .saturating_mul(span(z0, z1));
        Self::within_volume(volume)?;

        let mut placements = Vec::with_capacity(volume as usize);
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    placements.push((BlockPos::new(x, y, z), PlacedBlock::plain(&request.block_type)));
                }
            }
        }

        let placed = self.commit(&world, placements)?;
        Ok(format!("Filled {} blocks with {}", placed, request.block_type))
    }

    fn place_door(&mut self, request: &DoorRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.block_of_kind(&request.block_type, "_door")?;
        if request.width <= 0 {
            return Err(WorldError::Rejected("Door width must be positive".to_string()));
        }
        Self::within_volume(i64::from(request.width) * 2)?;

        let (dx, dz) = request.facing.lateral();
        let mut placements = Vec::new();
        for i in 0..request.width {
            let x = Self::offset(request.start_x, i64::from(dx) * i64::from(i))?;
            let z = Self::offset(request.start_z, i64::from(dz) * i64::from(i))?;
            let hinge = if request.double_doors && i % 2 == 1 {
                request.hinge.flipped()
            } else {
                request.hinge
            };
            for (half, dy) in [("lower", 0), ("upper", 1)] {
                let block = PlacedBlock::plain(&request.block_type)
                    .with("facing", request.facing)
                    .with("half", half)
                    .with("hinge", hinge.as_str())
                    .with("open", request.open);
                placements.push((BlockPos::new(x, Self::offset(request.start_y, dy)?, z), block));
            }
        }

        self.commit(&world, placements)?;
        Ok(format!(
            "Placed {} {} door(s) facing {}",
            request.width, request.block_type, request.facing
        ))
    }

    fn place_stairs(&mut self, request: &StairRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.known_block(&request.block_type)?;
        self.block_of_kind(&request.stair_type, "_stairs")?;

        let (x0, x1) = (request.start_x.min(request.end_x), request.start_x.max(request.end_x));
        let (y0, y1) = (request.start_y.min(request.end_y), request.start_y.max(request.end_y));
        let (z0, z1) = (request.start_z.min(request.end_z), request.start_z.max(request.end_z));
        let rise = i64::from(y1) - i64::from(y0);
        let columns = span(x0, x1).saturating_mul(span(z0, z1));
        let per_column = if request.fill_support { rise + 1 } else { 1 };
        Self::within_volume(columns.saturating_mul(per_column))?;

        // Steps climb toward the facing direction; each column along the run
        // gets one stair block at its step height.
        let facing = request.staircase_direction;
        let (fx, fz) = facing.forward();
        let (run_start, run_len) = match facing {
            Facing::East | Facing::West => (if fx > 0 { x0 } else { x1 }, i64::from(x1) - i64::from(x0)),
            Facing::North | Facing::South => (if fz > 0 { z0 } else { z1 }, i64::from(z1) - i64::from(z0)),
        };

        let mut placements = Vec::new();
        for x in x0..=x1 {
            for z in z0..=z1 {
                let along = match facing {
                    Facing::East | Facing::West => (i64::from(x) - i64::from(run_start)).abs(),
                    Facing::North | Facing::South => (i64::from(z) - i64::from(run_start)).abs(),
                };
                let step = if run_len == 0 { rise } else { along * rise / run_len };
                let y = Self::offset(y0, step)?;
                placements.push((
                    BlockPos::new(x, y, z),
                    PlacedBlock::plain(&request.stair_type)
                        .with("facing", facing)
                        .with("half", "bottom"),
                ));
                if request.fill_support {
                    for support_y in y0..y {
                        placements.push((BlockPos::new(x, support_y, z), PlacedBlock::plain(&request.block_type)));
                    }
                }
            }
        }

        let placed = self.commit(&world, placements)?;
        Ok(format!("Placed staircase of {} blocks facing {}", placed, facing))
    }

    fn place_window(&mut self, request: &WindowPaneRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.known_block(&request.block_type)?;
        if request.start_x != request.end_x && request.start_z != request.end_z {
            return Err(WorldError::Rejected(
                "Window pane wall must be aligned north-south or east-west".to_string(),
            ));
        }
        if request.height <= 0 {
            return Err(WorldError::Rejected("Window height must be positive".to_string()));
        }

        let (x0, x1) = (request.start_x.min(request.end_x), request.start_x.max(request.end_x));
        let (z0, z1) = (request.start_z.min(request.end_z), request.start_z.max(request.end_z));
        Self::within_volume(
            span(x0, x1)
                .saturating_mul(span(z0, z1))
                .saturating_mul(i64::from(request.height)),
        )?;
        let mut placements = Vec::new();
        for x in x0..=x1 {
            for z in z0..=z1 {
                for dy in 0..request.height {
                    let y = Self::offset(request.start_y, i64::from(dy))?;
                    placements.push((
                        BlockPos::new(x, y, z),
                        PlacedBlock::plain(&request.block_type).with("waterlogged", request.waterlogged),
                    ));
                }
            }
        }

        let placed = self.commit(&world, placements)?;
        Ok(format!("Placed {} window panes", placed))
    }

    fn place_torch(&mut self, request: &TorchRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.block_of_kind(&request.block_type, "torch")?;

        let mut block = PlacedBlock::plain(&request.block_type);
        if let Some(facing) = request.facing {
            block = block.with("facing", facing);
        }
        self.commit(&world, vec![(BlockPos::new(request.x, request.y, request.z), block)])?;
        Ok(format!(
            "Placed {} at ({}, {}, {})",
            request.block_type, request.x, request.y, request.z
        ))
    }

    fn place_sign(&mut self, request: &SignRequest) -> Result<String, WorldError> {
        let world = self.dimension(request.world.as_deref())?;
        self.block_of_kind(&request.block_type, "sign")?;
        if request.front_lines.len() > 4 || request.back_lines.len() > 4 {
            return Err(WorldError::Rejected("Signs hold at most 4 lines per side".to_string()));
        }

        let pos = BlockPos::new(request.x, request.y, request.z);
        let mut block = PlacedBlock::plain(&request.block_type);
        if let Some(facing) = request.facing {
            block = block.with("facing", facing);
        } else if let Some(rotation) = request.rotation {
            block = block.with("rotation", rotation);
        }
        self.commit(&world, vec![(pos, block)])?;
        self.signs.insert(
            (world, pos),
            SignText {
                front: request.front_lines.clone(),
                back: request.back_lines.clone(),
                glowing: request.glowing,
            },
        );
        Ok(format!(
            "Placed {} at ({}, {}, {})",
            request.block_type, request.x, request.y, request.z
        ))
    }
}
