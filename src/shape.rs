//! Shape-tolerant access to raw record values.
//!
//! Source records are heterogeneous: any nested field can be absent, null, or
//! of an unexpected type. Every read goes through an explicit shape match and
//! degrades to a default on mismatch instead of raising.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};

/// The shapes a nested field can take, as far as extraction cares.
#[derive(Debug, Clone, Copy)]
pub enum Shape<'a> {
    Missing,
    Null,
    Mapping(&'a Map<String, Value>),
    Sequence(&'a [Value]),
    Text(&'a str),
    Number(&'a serde_json::Number),
    Flag(bool),
}

pub fn shape_of<'a>(value: Option<&'a Value>) -> Shape<'a> {
    match value {
        None => Shape::Missing,
        Some(Value::Null) => Shape::Null,
        Some(Value::Object(map)) => Shape::Mapping(map),
        Some(Value::Array(items)) => Shape::Sequence(items),
        Some(Value::String(text)) => Shape::Text(text),
        Some(Value::Number(number)) => Shape::Number(number),
        Some(Value::Bool(flag)) => Shape::Flag(*flag),
    }
}

pub fn field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key)
}

/// Nested mapping, or `None` when the field is absent, null, or not a mapping.
pub fn map_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    match shape_of(field(map, key)) {
        Shape::Mapping(inner) => Some(inner),
        _ => None,
    }
}

/// Nested array as a slice. Absent, null, and empty all yield an empty slice.
pub fn array_field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match shape_of(field(map, key)) {
        Shape::Sequence(items) => items,
        _ => &[],
    }
}

/// Non-empty string field; anything else resolves to `None`.
pub fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match shape_of(field(map, key)) {
        Shape::Text(text) if !text.is_empty() => Some(text.to_string()),
        _ => None,
    }
}

/// Boolean field; any other shape resolves to `false`.
pub fn flag_field(map: &Map<String, Value>, key: &str) -> bool {
    match shape_of(field(map, key)) {
        Shape::Flag(flag) => flag,
        _ => false,
    }
}

/// Scalar rendered as text: strings pass through, numbers are formatted.
/// Used for month/year values that arrive as either.
pub fn scalar_text(value: Option<&Value>) -> Option<String> {
    match shape_of(value) {
        Shape::Text(text) if !text.is_empty() => Some(text.to_string()),
        Shape::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Coercions that need a compiled pattern.
#[derive(Debug)]
pub struct Coercions {
    count: Regex,
}

impl Coercions {
    pub fn new() -> Result<Self> {
        Ok(Self {
            count: Regex::new(r"^\s*(-?\d[\d,]*)(?:\.\d+)?\s*$")
                .context("failed to compile count pattern")?,
        })
    }

    /// Integer counts arrive as numbers, float-ish numbers, or strings like
    /// `"1,234"` and `"123.0"`. Everything else resolves to `None`.
    pub fn count(&self, value: Option<&Value>) -> Option<i64> {
        match shape_of(value) {
            Shape::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64)),
            Shape::Text(text) => {
                let captures = self.count.captures(text)?;
                captures[1].replace(',', "").parse::<i64>().ok()
            }
            _ => None,
        }
    }

    pub fn count_field(&self, map: &Map<String, Value>, key: &str) -> Option<i64> {
        self.count(field(map, key))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn array_field_treats_absent_null_and_empty_alike() {
        let absent = record(json!({}));
        let null = record(json!({ "areas_of_interest": null }));
        let empty = record(json!({ "areas_of_interest": [] }));
        let wrong = record(json!({ "areas_of_interest": "sector" }));

        assert!(array_field(&absent, "areas_of_interest").is_empty());
        assert!(array_field(&null, "areas_of_interest").is_empty());
        assert!(array_field(&empty, "areas_of_interest").is_empty());
        assert!(array_field(&wrong, "areas_of_interest").is_empty());
    }

    #[test]
    fn text_field_drops_empty_and_non_string_values() {
        let map = record(json!({ "a": "Alice", "b": "", "c": 7, "d": null }));

        assert_eq!(text_field(&map, "a").as_deref(), Some("Alice"));
        assert_eq!(text_field(&map, "b"), None);
        assert_eq!(text_field(&map, "c"), None);
        assert_eq!(text_field(&map, "d"), None);
    }

    #[test]
    fn flag_field_defaults_to_false_on_mismatch() {
        let map = record(json!({ "claimed": true, "can_edit": "yes", "is_me": 1 }));

        assert!(flag_field(&map, "claimed"));
        assert!(!flag_field(&map, "can_edit"));
        assert!(!flag_field(&map, "is_me"));
        assert!(!flag_field(&map, "missing"));
    }

    #[test]
    fn count_coercion_accepts_numbers_and_numeric_strings() {
        let coercions = Coercions::new().unwrap();
        let map = record(json!({
            "a": 42,
            "b": 42.9,
            "c": "1,234",
            "d": "123.0",
            "e": "n/a",
            "f": ["10"],
        }));

        assert_eq!(coercions.count_field(&map, "a"), Some(42));
        assert_eq!(coercions.count_field(&map, "b"), Some(42));
        assert_eq!(coercions.count_field(&map, "c"), Some(1234));
        assert_eq!(coercions.count_field(&map, "d"), Some(123));
        assert_eq!(coercions.count_field(&map, "e"), None);
        assert_eq!(coercions.count_field(&map, "f"), None);
        assert_eq!(coercions.count_field(&map, "missing"), None);
    }

    #[test]
    fn scalar_text_formats_numbers() {
        assert_eq!(scalar_text(Some(&json!("May"))), Some("May".to_string()));
        assert_eq!(scalar_text(Some(&json!(2019))), Some("2019".to_string()));
        assert_eq!(scalar_text(Some(&json!(null))), None);
        assert_eq!(scalar_text(None), None);
    }
}
