//! Field access over raw JSON task payloads.
//!
//! Payload keys are snake_case; the camelCase spelling of each key is
//! accepted as well.

use serde_json::Value;

pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Looks up `name`, falling back to its camelCase alias. JSON `null` counts as absent.
pub fn field<'a>(data: &'a Value, name: &str) -> Option<&'a Value> {
    let object = data.as_object()?;
    object
        .get(name)
        .or_else(|| object.get(&camel_case(name)))
        .filter(|v| !v.is_null())
}

pub fn int_field(data: &Value, name: &str) -> Option<i32> {
    field(data, name)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

pub fn str_field<'a>(data: &'a Value, name: &str) -> Option<&'a str> {
    field(data, name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("start_x"), "startX");
        assert_eq!(camel_case("double_doors"), "doubleDoors");
        assert_eq!(camel_case("x1"), "x1");
    }

    #[test]
    fn test_field_lookup() {
        let data = json!({"start_x": 4, "startY": 5, "z": null, "big": 5_000_000_000i64, "f": 1.5});
        assert_eq!(int_field(&data, "start_x"), Some(4));
        assert_eq!(int_field(&data, "start_y"), Some(5));
        assert_eq!(int_field(&data, "z"), None);
        assert_eq!(int_field(&data, "big"), None);
        assert_eq!(int_field(&data, "f"), None);
        assert_eq!(field(&json!([1, 2]), "x"), None);
    }
}
