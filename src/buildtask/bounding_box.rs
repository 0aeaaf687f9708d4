//! Spatial extent of a task.
//!
//! `derive_bounding_box` is total: payloads missing the coordinates a type
//! needs simply produce no box.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buildtask::model::TaskType;
use crate::buildtask::payload::{field, int_field, str_field};
use crate::buildtask::requests::Facing;

/// Inclusive axis-aligned integer box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub max_z: i32,
}

impl BoundingBox {
    /// Builds a box from two arbitrary corners.
    pub fn new(x1: i32, y1: i32, z1: i32, x2: i32, y2: i32, z2: i32) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            min_z: z1.min(z2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
            max_z: z1.max(z2),
        }
    }

    pub fn point(x: i32, y: i32, z: i32) -> Self {
        Self::new(x, y, z, x, y, z)
    }

    pub fn width(&self) -> i64 {
        i64::from(self.max_x) - i64::from(self.min_x) + 1
    }

    pub fn height(&self) -> i64 {
        i64::from(self.max_y) - i64::from(self.min_y) + 1
    }

    pub fn depth(&self) -> i64 {
        i64::from(self.max_z) - i64::from(self.min_z) + 1
    }

    pub fn volume(&self) -> i64 {
        self.width() * self.height() * self.depth()
    }

    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        (self.min_x..=self.max_x).contains(&x)
            && (self.min_y..=self.max_y).contains(&y)
            && (self.min_z..=self.max_z).contains(&z)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersects_xz(other) && self.min_y <= other.max_y && self.max_y >= other.min_y
    }

    /// Overlap in the horizontal plane only.
    pub fn intersects_xz(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_z <= other.max_z
            && self.max_z >= other.min_z
    }

    fn from_i64(min: [i64; 3], max: [i64; 3]) -> Option<Self> {
        let cast = |v: i64| i32::try_from(v).ok();
        Some(Self::new(
            cast(min[0])?,
            cast(min[1])?,
            cast(min[2])?,
            cast(max[0])?,
            cast(max[1])?,
            cast(max[2])?,
        ))
    }
}

pub fn derive_bounding_box(task_type: TaskType, data: &Value) -> Option<BoundingBox> {
    match task_type {
        TaskType::BlockSet => block_set_box(data),
        TaskType::BlockFill => corners_box(data, ["x1", "y1", "z1"], ["x2", "y2", "z2"]),
        TaskType::PrefabDoor => door_box(data),
        TaskType::PrefabStairs => corners_box(
            data,
            ["start_x", "start_y", "start_z"],
            ["end_x", "end_y", "end_z"],
        ),
        TaskType::PrefabWindow => window_box(data),
        TaskType::PrefabTorch | TaskType::PrefabSign => point_box(data),
    }
}

fn coords(data: &Value, names: [&str; 3]) -> Option<[i64; 3]> {
    Some([
        i64::from(int_field(data, names[0])?),
        i64::from(int_field(data, names[1])?),
        i64::from(int_field(data, names[2])?),
    ])
}

fn corners_box(data: &Value, first: [&str; 3], second: [&str; 3]) -> Option<BoundingBox> {
    let a = coords(data, first)?;
    let b = coords(data, second)?;
    BoundingBox::from_i64(a, b)
}

fn block_set_box(data: &Value) -> Option<BoundingBox> {
    let [sx, sy, sz] = coords(data, ["start_x", "start_y", "start_z"])?;
    let blocks = field(data, "blocks")?.as_array()?;

    let mut bounds: Option<([i64; 3], [i64; 3])> = None;
    for (x, plane) in blocks.iter().enumerate() {
        let Some(plane) = plane.as_array() else { continue };
        for (y, column) in plane.iter().enumerate() {
            let Some(column) = column.as_array() else { continue };
            for (z, cell) in column.iter().enumerate() {
                if cell.is_null() {
                    continue;
                }
                let p = [sx + x as i64, sy + y as i64, sz + z as i64];
                bounds = Some(match bounds {
                    None => (p, p),
                    Some((lo, hi)) => (
                        [lo[0].min(p[0]), lo[1].min(p[1]), lo[2].min(p[2])],
                        [hi[0].max(p[0]), hi[1].max(p[1]), hi[2].max(p[2])],
                    ),
                });
            }
        }
    }

    let (lo, hi) = bounds?;
    BoundingBox::from_i64(lo, hi)
}

fn door_box(data: &Value) -> Option<BoundingBox> {
    let [sx, sy, sz] = coords(data, ["start_x", "start_y", "start_z"])?;
    let facing: Facing = str_field(data, "facing")?.parse().ok()?;
    let width = match field(data, "width") {
        None => 1,
        Some(_) => i64::from(int_field(data, "width")?),
    };
    if width <= 0 {
        return None;
    }

    let (dx, dz) = facing.lateral();
    let far_x = sx + i64::from(dx) * (width - 1);
    let far_z = sz + i64::from(dz) * (width - 1);
    BoundingBox::from_i64([sx, sy, sz], [far_x, sy + 1, far_z])
}

fn window_box(data: &Value) -> Option<BoundingBox> {
    let [sx, sy, sz] = coords(data, ["start_x", "start_y", "start_z"])?;
    let ex = i64::from(int_field(data, "end_x")?);
    let ez = i64::from(int_field(data, "end_z")?);
    let height = i64::from(int_field(data, "height")?);
    if height <= 0 {
        return None;
    }
    BoundingBox::from_i64([sx, sy, sz], [ex, sy + height - 1, ez])
}

fn point_box(data: &Value) -> Option<BoundingBox> {
    let [x, y, z] = coords(data, ["x", "y", "z"])?;
    let size = match field(data, "size") {
        None => 1,
        Some(_) => i64::from(int_field(data, "size")?),
    };
    if size <= 0 {
        return None;
    }
    BoundingBox::from_i64([x, y, z], [x + size - 1, y + size - 1, z + size - 1])
}
