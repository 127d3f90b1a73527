//! Prompt and schema presets.
//!
//! A preset bundles per-stage prompt text and structured-output schemas
//! under a stable id. Builtin presets are compiled in and immutable; user
//! presets are plain data records registered at runtime. The core never
//! mutates a preset — it only dereferences by id, falling back to a stage
//! config's inline custom text when the id no longer resolves.

use crate::error::{RecastError, Result};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Per-stage content of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetStageEntry {
    /// Prompt text for the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Structured-output schema for the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A named, reusable prompt/schema template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPreset {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Per-stage prompt/schema content
    #[serde(default)]
    pub stages: BTreeMap<Stage, PresetStageEntry>,
    /// Builtin presets are compiled in and immutable
    #[serde(default)]
    pub is_builtin: bool,
    /// Preset record version
    #[serde(default = "default_preset_version")]
    pub version: u32,
}

fn default_preset_version() -> u32 {
    1
}

/// The builtin presets shipped with the engine.
fn builtin_presets() -> Vec<PromptPreset> {
    let score_schema = json!({
        "type": "object",
        "properties": {
            "score": {"type": "integer", "minimum": 1, "maximum": 10},
            "strengths": {"type": "array", "items": {"type": "string"}},
            "weaknesses": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["score"]
    });
    let analyze_schema = json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string"},
            "regressions": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["verdict"]
    });

    vec![
        PromptPreset {
            id: "builtin:character-refinement".to_string(),
            name: "Character Refinement".to_string(),
            stages: BTreeMap::from([
                (
                    Stage::Score,
                    PresetStageEntry {
                        prompt: Some(
                            "Rate the selected character fields from 1-10 for clarity, \
                             internal consistency and evocativeness. Justify the rating \
                             with concrete references to the text."
                                .to_string(),
                        ),
                        schema: Some(score_schema),
                    },
                ),
                (
                    Stage::Rewrite,
                    PresetStageEntry {
                        prompt: Some(
                            "Rewrite the selected character fields, keeping every \
                             established fact while improving prose quality and economy. \
                             Return only the rewritten fields."
                                .to_string(),
                        ),
                        schema: None,
                    },
                ),
                (
                    Stage::Analyze,
                    PresetStageEntry {
                        prompt: Some(
                            "Compare the rewrite against the original fields. Point out \
                             lost details, contradictions and tonal drift."
                                .to_string(),
                        ),
                        schema: Some(analyze_schema),
                    },
                ),
            ]),
            is_builtin: true,
            version: 1,
        },
        PromptPreset {
            id: "builtin:quick-pass".to_string(),
            name: "Quick Pass".to_string(),
            stages: BTreeMap::from([
                (
                    Stage::Score,
                    PresetStageEntry {
                        prompt: Some("Rate these fields 1-10. One sentence per field.".to_string()),
                        schema: None,
                    },
                ),
                (
                    Stage::Rewrite,
                    PresetStageEntry {
                        prompt: Some(
                            "Tighten the selected fields without changing their meaning.".to_string(),
                        ),
                        schema: None,
                    },
                ),
            ]),
            is_builtin: true,
            version: 1,
        },
    ]
}

/// Registry of builtin and user presets, read-mostly.
pub struct PresetRegistry {
    builtins: Vec<PromptPreset>,
    user: RwLock<BTreeMap<String, PromptPreset>>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self {
            builtins: builtin_presets(),
            user: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers (or replaces) a user preset. Builtin ids are reserved.
    pub fn register(&self, preset: PromptPreset) -> Result<()> {
        if self.builtins.iter().any(|b| b.id == preset.id) {
            return Err(RecastError::validation(format!(
                "preset id '{}' is reserved for a builtin preset",
                preset.id
            )));
        }
        self.user
            .write()
            .expect("preset registry lock poisoned")
            .insert(preset.id.clone(), preset);
        Ok(())
    }

    /// Removes a user preset; absent ids are a no-op.
    pub fn remove(&self, preset_id: &str) {
        self.user
            .write()
            .expect("preset registry lock poisoned")
            .remove(preset_id);
    }

    /// Looks up a preset by id, builtins first.
    pub fn get(&self, preset_id: &str) -> Option<PromptPreset> {
        if let Some(builtin) = self.builtins.iter().find(|b| b.id == preset_id) {
            return Some(builtin.clone());
        }
        self.user
            .read()
            .expect("preset registry lock poisoned")
            .get(preset_id)
            .cloned()
    }

    /// All presets, builtins first.
    pub fn list(&self) -> Vec<PromptPreset> {
        let mut all = self.builtins.clone();
        all.extend(
            self.user
                .read()
                .expect("preset registry lock poisoned")
                .values()
                .cloned(),
        );
        all
    }

    /// Resolves a stage's prompt text.
    ///
    /// The preset id wins when it resolves and carries prompt text for
    /// the stage; otherwise the inline custom prompt is used (e.g. the
    /// preset was deleted after the stage config referenced it).
    pub fn resolve_prompt(&self, preset_id: Option<&str>, custom: &str, stage: Stage) -> String {
        if let Some(id) = preset_id {
            match self.get(id).and_then(|p| {
                p.stages
                    .get(&stage)
                    .and_then(|entry| entry.prompt.clone())
            }) {
                Some(prompt) if !prompt.trim().is_empty() => return prompt,
                _ => {
                    tracing::debug!(
                        preset_id = id,
                        stage = %stage,
                        "prompt preset did not resolve, falling back to custom prompt"
                    );
                }
            }
        }
        custom.to_string()
    }

    /// Resolves a stage's structured-output schema.
    ///
    /// The preset id wins when it resolves and carries a schema for the
    /// stage; otherwise the custom schema text is parsed. A custom schema
    /// that does not parse as a well-formed schema is a validation error;
    /// no schema anywhere is `Ok(None)`.
    pub fn resolve_schema(
        &self,
        preset_id: Option<&str>,
        custom: &str,
        stage: Stage,
    ) -> Result<Option<Value>> {
        if let Some(id) = preset_id {
            if let Some(schema) = self
                .get(id)
                .and_then(|p| p.stages.get(&stage).and_then(|entry| entry.schema.clone()))
            {
                return Ok(Some(schema));
            }
            tracing::debug!(
                preset_id = id,
                stage = %stage,
                "schema preset did not resolve, falling back to custom schema"
            );
        }
        if custom.trim().is_empty() {
            return Ok(None);
        }
        let parsed: Value = serde_json::from_str(custom)
            .map_err(|e| RecastError::validation(format!("schema does not parse: {e}")))?;
        validate_schema(&parsed)?;
        Ok(Some(parsed))
    }
}

/// A well-formed structured-output schema is a JSON object declaring its
/// `type`.
fn validate_schema(schema: &Value) -> Result<()> {
    let obj = schema
        .as_object()
        .ok_or_else(|| RecastError::validation("schema must be a JSON object"))?;
    if !obj.contains_key("type") {
        return Err(RecastError::validation(
            "schema is missing its 'type' member",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_preset(id: &str) -> PromptPreset {
        PromptPreset {
            id: id.to_string(),
            name: "Mine".to_string(),
            stages: BTreeMap::from([(
                Stage::Score,
                PresetStageEntry {
                    prompt: Some("Score it my way.".to_string()),
                    schema: Some(json!({"type": "object", "properties": {}})),
                },
            )]),
            is_builtin: false,
            version: 1,
        }
    }

    #[test]
    fn test_builtin_ids_are_unique_and_resolvable() {
        let registry = PresetRegistry::new();
        let mut ids = std::collections::HashSet::new();
        for preset in registry.list() {
            assert!(ids.insert(preset.id.clone()), "duplicate id {}", preset.id);
            assert!(registry.get(&preset.id).is_some());
        }
    }

    #[test]
    fn test_register_rejects_builtin_ids() {
        let registry = PresetRegistry::new();
        let mut preset = user_preset("builtin:character-refinement");
        preset.is_builtin = false;
        assert!(registry.register(preset).is_err());
    }

    #[test]
    fn test_resolve_prompt_prefers_preset() {
        let registry = PresetRegistry::new();
        registry.register(user_preset("mine")).unwrap();
        let prompt = registry.resolve_prompt(Some("mine"), "custom text", Stage::Score);
        assert_eq!(prompt, "Score it my way.");
    }

    #[test]
    fn test_resolve_prompt_falls_back_when_preset_gone() {
        let registry = PresetRegistry::new();
        let prompt = registry.resolve_prompt(Some("deleted-id"), "custom text", Stage::Score);
        assert_eq!(prompt, "custom text");
    }

    #[test]
    fn test_resolve_prompt_falls_back_when_stage_missing() {
        let registry = PresetRegistry::new();
        registry.register(user_preset("mine")).unwrap();
        // "mine" has no Analyze entry.
        let prompt = registry.resolve_prompt(Some("mine"), "custom text", Stage::Analyze);
        assert_eq!(prompt, "custom text");
    }

    #[test]
    fn test_resolve_schema_parses_custom() {
        let registry = PresetRegistry::new();
        let schema = registry
            .resolve_schema(None, r#"{"type": "object"}"#, Stage::Score)
            .unwrap();
        assert!(schema.is_some());
    }

    #[test]
    fn test_resolve_schema_rejects_unparsable_custom() {
        let registry = PresetRegistry::new();
        let err = registry
            .resolve_schema(None, "{not json", Stage::Score)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_resolve_schema_rejects_malformed_schema() {
        let registry = PresetRegistry::new();
        let err = registry
            .resolve_schema(None, r#"{"properties": {}}"#, Stage::Score)
            .unwrap_err();
        assert!(err.is_validation());
        let err = registry
            .resolve_schema(None, r#"["type"]"#, Stage::Score)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_resolve_schema_none_when_absent_everywhere() {
        let registry = PresetRegistry::new();
        let schema = registry.resolve_schema(None, "   ", Stage::Score).unwrap();
        assert!(schema.is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = PresetRegistry::new();
        registry.register(user_preset("mine")).unwrap();
        registry.remove("mine");
        registry.remove("mine");
        assert!(registry.get("mine").is_none());
    }
}
