//! Structural checks for task payloads.
//!
//! Every rule for a type runs, and all violations are reported together so a
//! caller can fix a payload in one round trip.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::buildtask::model::TaskType;
use crate::buildtask::payload::field;

static BLOCK_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_.\-]+:[a-z0-9_.\-/]+$").expect("block identifier pattern is valid")
});

const CARDINALS: [&str; 4] = ["north", "south", "east", "west"];
const MAX_SIGN_LINES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub error_message: Option<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            valid: true,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_message: Some(message.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

pub fn is_valid_block_identifier(identifier: &str) -> bool {
    BLOCK_ID.is_match(identifier)
}

pub fn validate_task_data(task_type: Option<TaskType>, data: Option<&Value>) -> ValidationResult {
    let Some(task_type) = task_type else {
        return ValidationResult::failure("Task type cannot be null");
    };
    let Some(data) = data.filter(|d| !d.is_null()) else {
        return ValidationResult::failure("Task data cannot be null");
    };
    if !data.is_object() {
        return ValidationResult::failure("Task data must be a JSON object");
    }

    let mut check = Checker::new(data);
    match task_type {
        TaskType::BlockSet => {
            check.ints(&["start_x", "start_y", "start_z"]);
            check.blocks();
        }
        TaskType::BlockFill => {
            check.ints(&["x1", "y1", "z1", "x2", "y2", "z2"]);
            check.block_id("block_type");
        }
        TaskType::PrefabDoor => {
            check.ints(&["start_x", "start_y", "start_z"]);
            check.cardinal("facing", true);
            check.block_id("block_type");
            check.optional_positive_int("width");
            check.optional_choice("hinge", &["left", "right"]);
            check.optional_bool("open");
            check.optional_bool("double_doors");
        }
        TaskType::PrefabStairs => {
            check.ints(&["start_x", "start_y", "start_z", "end_x", "end_y", "end_z"]);
            check.block_id("block_type");
            check.block_id("stair_type");
            check.cardinal("staircase_direction", true);
            check.optional_bool("fill_support");
        }
        TaskType::PrefabWindow => {
            check.ints(&["start_x", "start_y", "start_z", "end_x", "end_z"]);
            check.positive_int("height");
            check.block_id("block_type");
            check.axis_aligned_wall();
            check.optional_bool("waterlogged");
        }
        TaskType::PrefabTorch => {
            check.ints(&["x", "y", "z"]);
            check.block_id("block_type");
            check.cardinal("facing", false);
            check.optional_positive_int("size");
        }
        TaskType::PrefabSign => {
            check.ints(&["x", "y", "z"]);
            check.block_id("block_type");
            check.sign_lines("front_lines");
            check.sign_lines("back_lines");
            check.cardinal("facing", false);
            check.rotation();
            check.optional_bool("glowing");
            check.optional_positive_int("size");
        }
    }
    check.world();
    check.finish()
}

struct Checker<'a> {
    data: &'a Value,
    errors: Vec<String>,
}

impl<'a> Checker<'a> {
    fn new(data: &'a Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            ValidationResult::success()
        } else {
            ValidationResult::failure(self.errors.join("; "))
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        field(self.data, name)
    }

    fn as_int(value: &Value) -> Option<i64> {
        value.as_i64().filter(|v| i32::try_from(*v).is_ok())
    }

    fn ints(&mut self, names: &[&str]) {
        for name in names {
            if self.get(name).and_then(Self::as_int).is_none() {
                self.errors
                    .push(format!("{} is required and must be an integer", name));
            }
        }
    }

    fn positive_int(&mut self, name: &str) {
        match self.get(name).and_then(Self::as_int) {
            Some(v) if v > 0 => {}
            _ => self
                .errors
                .push(format!("{} is required and must be a positive integer", name)),
        }
    }

    fn optional_positive_int(&mut self, name: &str) {
        if let Some(value) = self.get(name) {
            if !Self::as_int(value).is_some_and(|v| v > 0) {
                self.errors
                    .push(format!("{} must be a positive integer if provided", name));
            }
        }
    }

    fn optional_bool(&mut self, name: &str) {
        if let Some(value) = self.get(name) {
            if !value.is_boolean() {
                self.errors
                    .push(format!("{} must be a boolean if provided", name));
            }
        }
    }

    fn optional_choice(&mut self, name: &str, choices: &[&str]) {
        if let Some(value) = self.get(name) {
            let ok = value
                .as_str()
                .map(|s| choices.contains(&s.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !ok {
                self.errors.push(format!(
                    "{} must be one of: {} if provided",
                    name,
                    choices.join(", ")
                ));
            }
        }
    }

    fn cardinal(&mut self, name: &str, required: bool) {
        match self.get(name) {
            None if required => self
                .errors
                .push(format!("{} is required and must be a string", name)),
            None => {}
            Some(value) => match value.as_str() {
                None => self.errors.push(format!("{} must be a string", name)),
                Some(s) if !CARDINALS.contains(&s.to_ascii_lowercase().as_str()) => {
                    self.errors.push(format!(
                        "{} must be one of: {}",
                        name,
                        CARDINALS.join(", ")
                    ))
                }
                Some(_) => {}
            },
        }
    }

    fn block_id(&mut self, name: &str) {
        match self.get(name).and_then(Value::as_str) {
            None => self
                .errors
                .push(format!("{} is required and must be a non-empty string", name)),
            Some(id) if id.trim().is_empty() => self
                .errors
                .push(format!("{} is required and must be a non-empty string", name)),
            Some(id) if !is_valid_block_identifier(id) => self.errors.push(format!(
                "{} must be a valid block identifier (e.g., 'minecraft:stone')",
                name
            )),
            Some(_) => {}
        }
    }

    fn world(&mut self) {
        if let Some(value) = self.get("world") {
            if value.as_str().map(str::trim).unwrap_or("").is_empty() {
                self.errors
                    .push("world must be a non-empty string if provided".to_string());
            }
        }
    }

    fn blocks(&mut self) {
        let Some(blocks) = self.get("blocks").and_then(Value::as_array) else {
            self.errors
                .push("blocks is required and must be a 3D array".to_string());
            return;
        };
        if blocks.is_empty() {
            self.errors.push("blocks array cannot be empty".to_string());
            return;
        }

        for (x, plane) in blocks.iter().enumerate() {
            let Some(plane) = plane.as_array() else {
                self.errors
                    .push(format!("blocks[{}] must be an array (Y dimension)", x));
                continue;
            };
            for (y, column) in plane.iter().enumerate() {
                let Some(column) = column.as_array() else {
                    self.errors
                        .push(format!("blocks[{}][{}] must be an array (Z dimension)", x, y));
                    continue;
                };
                for (z, cell) in column.iter().enumerate() {
                    self.block_cell(cell, x, y, z);
                }
            }
        }
    }

    fn block_cell(&mut self, cell: &Value, x: usize, y: usize, z: usize) {
        let position = format!("blocks[{}][{}][{}]", x, y, z);
        match cell {
            Value::Null => {}
            Value::String(id) => {
                if !is_valid_block_identifier(id) {
                    self.errors
                        .push(format!("{} must be a valid block identifier", position));
                }
            }
            Value::Object(_) => {
                match field(cell, "block_name").and_then(Value::as_str) {
                    None => self.errors.push(format!(
                        "{}.block_name is required and must be a string",
                        position
                    )),
                    Some(id) if !is_valid_block_identifier(id) => self.errors.push(format!(
                        "{}.block_name must be a valid block identifier",
                        position
                    )),
                    Some(_) => {}
                }
                if let Some(properties) = field(cell, "properties") {
                    if !properties.is_object() {
                        self.errors.push(format!(
                            "{}.properties must be an object if provided",
                            position
                        ));
                    }
                }
            }
            _ => self.errors.push(format!(
                "{} must be null, a block identifier or a block data object",
                position
            )),
        }
    }

    fn axis_aligned_wall(&mut self) {
        let coord = |name| self.get(name).and_then(Self::as_int);
        if let (Some(sx), Some(sz), Some(ex), Some(ez)) = (
            coord("start_x"),
            coord("start_z"),
            coord("end_x"),
            coord("end_z"),
        ) {
            if sx != ex && sz != ez {
                self.errors
                    .push("Window pane wall must be aligned north-south or east-west".to_string());
            }
        }
    }

    fn sign_lines(&mut self, name: &str) {
        if let Some(value) = self.get(name) {
            match value.as_array() {
                None => self
                    .errors
                    .push(format!("{} must be an array if provided", name)),
                Some(lines) if lines.len() > MAX_SIGN_LINES => self.errors.push(format!(
                    "{} can have maximum {} lines",
                    name, MAX_SIGN_LINES
                )),
                Some(lines) if lines.iter().any(|l| !l.is_string()) => self
                    .errors
                    .push(format!("{} must contain only strings", name)),
                Some(_) => {}
            }
        }
    }

    fn rotation(&mut self) {
        if let Some(value) = self.get("rotation") {
            match Self::as_int(value) {
                None => self
                    .errors
                    .push("rotation must be an integer if provided".to_string()),
                Some(r) if !(0..=15).contains(&r) => self
                    .errors
                    .push("rotation must be between 0 and 15".to_string()),
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(result: ValidationResult) -> String {
        assert!(!result.is_valid());
        result.error_message.unwrap_or_default()
    }

    #[test]
    fn test_missing_type_or_data() {
        assert_eq!(
            validate_task_data(None, Some(&json!({}))),
            ValidationResult::failure("Task type cannot be null")
        );
        assert_eq!(
            validate_task_data(Some(TaskType::BlockFill), None),
            ValidationResult::failure("Task data cannot be null")
        );
        assert_eq!(
            validate_task_data(Some(TaskType::BlockFill), Some(&Value::Null)),
            ValidationResult::failure("Task data cannot be null")
        );
    }

    #[test]
    fn test_block_set_reports_every_missing_origin_field() {
        let msg = message(validate_task_data(
            Some(TaskType::BlockSet),
            Some(&json!({"blocks": [[["minecraft:stone"]]]})),
        ));
        assert!(msg.contains("start_x is required"), "{}", msg);
        assert!(msg.contains("start_y is required"), "{}", msg);
        assert!(msg.contains("start_z is required"), "{}", msg);
        assert_eq!(msg.matches("required").count(), 3);
    }

    #[test]
    fn test_block_set_cells() {
        let msg = message(validate_task_data(
            Some(TaskType::BlockSet),
            Some(&json!({
                "start_x": 0, "start_y": 0, "start_z": 0,
                "blocks": [[[null, "stone", {"properties": []}, 7]], 3]
            })),
        ));
        assert!(msg.contains("blocks[0][0][1] must be a valid block identifier"), "{}", msg);
        assert!(msg.contains("blocks[0][0][2].block_name is required"), "{}", msg);
        assert!(msg.contains("blocks[0][0][2].properties must be an object"), "{}", msg);
        assert!(msg.contains("blocks[0][0][3] must be null"), "{}", msg);
        assert!(msg.contains("blocks[1] must be an array (Y dimension)"), "{}", msg);

        let empty = message(validate_task_data(
            Some(TaskType::BlockSet),
            Some(&json!({"start_x": 0, "start_y": 0, "start_z": 0, "blocks": []})),
        ));
        assert_eq!(empty, "blocks array cannot be empty");
    }

    #[test]
    fn test_valid_payloads_for_each_type() {
        let cases = [
            (TaskType::BlockSet, json!({"start_x": 0, "start_y": 64, "start_z": 0, "blocks": [[[null, {"block_name": "minecraft:stone", "properties": {}}]]]})),
            (TaskType::BlockFill, json!({"x1": 0, "y1": 0, "z1": 0, "x2": 1, "y2": 1, "z2": 1, "block_type": "minecraft:stone"})),
            (TaskType::PrefabDoor, json!({"startX": 0, "startY": 64, "startZ": 0, "facing": "North", "blockType": "minecraft:oak_door", "width": 2, "hinge": "right", "doubleDoors": true})),
            (TaskType::PrefabStairs, json!({"start_x": 0, "start_y": 64, "start_z": 0, "end_x": 3, "end_y": 67, "end_z": 0, "block_type": "minecraft:stone", "stair_type": "minecraft:stone_stairs", "staircase_direction": "east"})),
            (TaskType::PrefabWindow, json!({"start_x": 0, "start_y": 64, "start_z": 0, "end_x": 4, "end_z": 0, "height": 2, "block_type": "minecraft:glass_pane", "waterlogged": false})),
            (TaskType::PrefabTorch, json!({"x": 0, "y": 64, "z": 0, "block_type": "minecraft:wall_torch", "facing": "south"})),
            (TaskType::PrefabSign, json!({"x": 0, "y": 64, "z": 0, "block_type": "minecraft:oak_sign", "front_lines": ["a", "b"], "rotation": 15, "glowing": true, "world": "minecraft:the_nether"})),
        ];
        for (task_type, data) in cases {
            let result = validate_task_data(Some(task_type), Some(&data));
            assert!(result.is_valid(), "{}: {:?}", task_type, result);
        }
    }

    #[test]
    fn test_door_rules() {
        let msg = message(validate_task_data(
            Some(TaskType::PrefabDoor),
            Some(&json!({"start_x": 0, "start_y": 0, "start_z": 0, "facing": "up", "block_type": "oak_door", "width": 0, "hinge": "middle", "open": "yes"})),
        ));
        assert!(msg.contains("facing must be one of: north, south, east, west"));
        assert!(msg.contains("block_type must be a valid block identifier"));
        assert!(msg.contains("width must be a positive integer"));
        assert!(msg.contains("hinge must be one of"));
        assert!(msg.contains("open must be a boolean"));
        assert_eq!(msg.split("; ").count(), 5);
    }

    #[test]
    fn test_window_must_be_axis_aligned() {
        let msg = message(validate_task_data(
            Some(TaskType::PrefabWindow),
            Some(&json!({"start_x": 0, "start_y": 64, "start_z": 0, "end_x": 3, "end_z": 3, "height": 2, "block_type": "minecraft:glass_pane"})),
        ));
        assert_eq!(msg, "Window pane wall must be aligned north-south or east-west");
    }

    #[test]
    fn test_sign_rules() {
        let msg = message(validate_task_data(
            Some(TaskType::PrefabSign),
            Some(&json!({"x": 0, "y": 0, "z": 0, "block_type": "minecraft:oak_sign", "front_lines": ["1", "2", "3", "4", "5"], "back_lines": "text", "rotation": 16})),
        ));
        assert!(msg.contains("front_lines can have maximum 4 lines"));
        assert!(msg.contains("back_lines must be an array"));
        assert!(msg.contains("rotation must be between 0 and 15"));
    }

    #[test]
    fn test_world_must_be_non_empty() {
        let msg = message(validate_task_data(
            Some(TaskType::PrefabTorch),
            Some(&json!({"x": 0, "y": 0, "z": 0, "block_type": "minecraft:torch", "world": " "})),
        ));
        assert_eq!(msg, "world must be a non-empty string if provided");
    }

    #[test]
    fn test_padded_block_type_is_rejected() {
        let msg = message(validate_task_data(
            Some(TaskType::BlockFill),
            Some(&json!({"x1": 0, "y1": 0, "z1": 0, "x2": 0, "y2": 0, "z2": 0, "block_type": " minecraft:stone"})),
        ));
        assert_eq!(msg, "block_type must be a valid block identifier (e.g., 'minecraft:stone')");

        let blank = message(validate_task_data(
            Some(TaskType::BlockFill),
            Some(&json!({"x1": 0, "y1": 0, "z1": 0, "x2": 0, "y2": 0, "z2": 0, "block_type": "  "})),
        ));
        assert_eq!(blank, "block_type is required and must be a non-empty string");
    }

    #[test]
    fn test_null_optionals_are_absent() {
        let result = validate_task_data(
            Some(TaskType::PrefabDoor),
            Some(&json!({"start_x": 0, "start_y": 64, "start_z": 0, "facing": "north", "block_type": "minecraft:oak_door", "width": null, "hinge": null})),
        );
        assert!(result.is_valid(), "{:?}", result);
    }

    #[test]
    fn test_block_identifiers() {
        assert!(is_valid_block_identifier("minecraft:stone"));
        assert!(is_valid_block_identifier("mod.pack:deco/lamp_1"));
        assert!(!is_valid_block_identifier("stone"));
        assert!(!is_valid_block_identifier(":stone"));
        assert!(!is_valid_block_identifier("minecraft:"));
        assert!(!is_valid_block_identifier("a:b:c"));
        assert!(!is_valid_block_identifier("Minecraft:Stone"));
    }

    #[test]
    fn test_non_integer_coordinates() {
        let msg = message(validate_task_data(
            Some(TaskType::BlockFill),
            Some(&json!({"x1": 1.5, "y1": "2", "z1": 0, "x2": 0, "y2": 0, "z2": 0, "block_type": "minecraft:stone"})),
        ));
        assert_eq!(
            msg,
            "x1 is required and must be an integer; y1 is required and must be an integer"
        );
    }
}
