//! Character document field schema and value extraction.
//!
//! A character record is an arbitrary JSON document supplied by the host.
//! The static [`FieldDescriptor`] list maps stable field keys to dotted
//! paths into that document; extraction is deliberately forgiving so a
//! partially-loaded record never fails a pipeline run.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a field's raw value is rendered into prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain string value, passed through as-is.
    Text,
    /// Array of entries; rendered as numbered lines, individually selectable.
    List,
    /// Nested object; rendered as pretty-printed JSON.
    Record,
}

/// One entry of the immutable document field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Stable key used by selections and the UI.
    pub key: String,
    /// Human-readable label.
    pub label: String,
    /// Dotted accessor into the document (segments may be array indices).
    pub path: String,
    /// Formatting category.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    fn new(key: &str, label: &str, path: &str, kind: FieldKind) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            path: path.to_string(),
            kind,
        }
    }
}

/// The static field schema for character cards.
///
/// Defined once; selections and stage inputs are expressed against these
/// keys. Paths follow the card's `data` wrapper object.
pub static CHARACTER_FIELDS: Lazy<Vec<FieldDescriptor>> = Lazy::new(|| {
    vec![
        FieldDescriptor::new("name", "Name", "data.name", FieldKind::Text),
        FieldDescriptor::new("description", "Description", "data.description", FieldKind::Text),
        FieldDescriptor::new("personality", "Personality", "data.personality", FieldKind::Text),
        FieldDescriptor::new("scenario", "Scenario", "data.scenario", FieldKind::Text),
        FieldDescriptor::new("first_message", "First Message", "data.first_mes", FieldKind::Text),
        FieldDescriptor::new(
            "example_dialogue",
            "Example Dialogue",
            "data.mes_example",
            FieldKind::Text,
        ),
        FieldDescriptor::new(
            "alternate_greetings",
            "Alternate Greetings",
            "data.alternate_greetings",
            FieldKind::List,
        ),
        FieldDescriptor::new(
            "system_prompt",
            "System Prompt",
            "data.system_prompt",
            FieldKind::Text,
        ),
        FieldDescriptor::new(
            "post_history_instructions",
            "Post-History Instructions",
            "data.post_history_instructions",
            FieldKind::Text,
        ),
        FieldDescriptor::new(
            "creator_notes",
            "Creator Notes",
            "data.creator_notes",
            FieldKind::Text,
        ),
        FieldDescriptor::new("tags", "Tags", "data.tags", FieldKind::List),
        FieldDescriptor::new(
            "character_book",
            "Character Book",
            "data.character_book",
            FieldKind::Record,
        ),
    ]
});

/// Looks up a descriptor by field key.
pub fn descriptor(key: &str) -> Option<&'static FieldDescriptor> {
    CHARACTER_FIELDS.iter().find(|d| d.key == key)
}

/// Walks a dotted path through a JSON document.
///
/// Path segments traverse objects by key; a segment that parses as an
/// integer indexes into arrays. Missing keys, out-of-range indices and
/// type mismatches all yield `None` — extraction never fails.
pub fn field_value<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// A field resolved against a concrete document, ready for prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedField {
    pub key: String,
    pub label: String,
    /// Rendered content; empty when the source value is missing or malformed.
    pub content: String,
    /// Unicode scalar count of `content`, reported for display.
    pub char_count: usize,
}

impl PopulatedField {
    pub fn new(key: impl Into<String>, label: impl Into<String>, content: String) -> Self {
        let char_count = content.chars().count();
        Self {
            key: key.into(),
            label: label.into(),
            content,
            char_count,
        }
    }
}

/// Renders a raw value according to its field kind.
///
/// `indices` restricts a List field to the given entries, in the given
/// order; `None` keeps the whole array. Anything malformed renders as
/// an empty string.
pub fn format_value(value: &Value, kind: FieldKind, indices: Option<&[usize]>) -> String {
    match kind {
        FieldKind::Text => scalar_text(value),
        FieldKind::List => {
            let Some(items) = value.as_array() else {
                return String::new();
            };
            let picked: Vec<&Value> = match indices {
                Some(idx) => idx.iter().filter_map(|&i| items.get(i)).collect(),
                None => items.iter().collect(),
            };
            picked
                .iter()
                .enumerate()
                .map(|(n, item)| format!("{}. {}", n + 1, scalar_text(item)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        FieldKind::Record => {
            if value.is_null() {
                String::new()
            } else {
                serde_json::to_string_pretty(value).unwrap_or_default()
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_card() -> Value {
        json!({
            "data": {
                "name": "Aria",
                "description": "A wandering cartographer.",
                "alternate_greetings": ["Hello there.", "Maps, anyone?", "Lost again?"],
                "tags": ["fantasy", "explorer"],
                "character_book": {"entries": [{"keys": ["map"], "content": "Knows every road."}]},
                "extensions": {"depth_prompt": {"depth": 4}}
            }
        })
    }

    #[test]
    fn test_field_value_walks_objects_and_arrays() {
        let card = sample_card();
        assert_eq!(
            field_value(&card, "data.name").and_then(Value::as_str),
            Some("Aria")
        );
        assert_eq!(
            field_value(&card, "data.alternate_greetings.1").and_then(Value::as_str),
            Some("Maps, anyone?")
        );
        assert_eq!(
            field_value(&card, "data.extensions.depth_prompt.depth").and_then(Value::as_u64),
            Some(4)
        );
    }

    #[test]
    fn test_field_value_is_forgiving() {
        let card = sample_card();
        assert!(field_value(&card, "data.missing").is_none());
        assert!(field_value(&card, "data.name.deeper").is_none());
        assert!(field_value(&card, "data.tags.9").is_none());
    }

    #[test]
    fn test_format_list_with_indices() {
        let card = sample_card();
        let greetings = field_value(&card, "data.alternate_greetings").unwrap();
        let rendered = format_value(greetings, FieldKind::List, Some(&[2, 0]));
        assert_eq!(rendered, "1. Lost again?\n2. Hello there.");
    }

    #[test]
    fn test_format_list_whole() {
        let card = sample_card();
        let tags = field_value(&card, "data.tags").unwrap();
        let rendered = format_value(tags, FieldKind::List, None);
        assert_eq!(rendered, "1. fantasy\n2. explorer");
    }

    #[test]
    fn test_format_record_pretty_prints() {
        let card = sample_card();
        let book = field_value(&card, "data.character_book").unwrap();
        let rendered = format_value(book, FieldKind::Record, None);
        assert!(rendered.contains("Knows every road."));
        assert!(rendered.contains('\n'));
    }

    #[test]
    fn test_malformed_values_render_empty() {
        assert_eq!(format_value(&json!("oops"), FieldKind::List, None), "");
        assert_eq!(format_value(&Value::Null, FieldKind::Record, None), "");
        assert_eq!(format_value(&Value::Null, FieldKind::Text, None), "");
    }

    #[test]
    fn test_populated_field_counts_chars() {
        let field = PopulatedField::new("name", "Name", "Ari\u{00e9}".to_string());
        assert_eq!(field.char_count, 4);
    }

    #[test]
    fn test_schema_keys_are_unique() {
        let mut keys = std::collections::HashSet::new();
        for d in CHARACTER_FIELDS.iter() {
            assert!(keys.insert(d.key.clone()), "duplicate field key: {}", d.key);
        }
    }
}
