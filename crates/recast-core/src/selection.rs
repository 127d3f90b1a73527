//! Per-stage field selection model.
//!
//! Selections come in two layers: a shared `base` selection, and optional
//! per-stage overrides. While `linked` is true every stage sees `base`;
//! unlinking snapshots the current effective selection into each stage's
//! override entry before any divergence is allowed, so nothing visibly
//! changes at the moment of unlinking.

use crate::character::{self, FieldDescriptor, FieldKind, PopulatedField};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::IntoEnumIterator;

/// Selection state for a single field.
///
/// Persisted as either a boolean (whole field) or an ordered array of
/// integer indices (specific entries of a List field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionEntry {
    /// The whole field is selected (or explicitly deselected).
    Whole(bool),
    /// Specific entries of a List field, in selection order.
    Items(Vec<usize>),
}

impl SelectionEntry {
    /// True when this entry actually selects something.
    pub fn is_selected(&self) -> bool {
        match self {
            SelectionEntry::Whole(on) => *on,
            SelectionEntry::Items(indices) => !indices.is_empty(),
        }
    }

    /// Index restriction for List rendering; `None` means the whole value.
    pub fn indices(&self) -> Option<&[usize]> {
        match self {
            SelectionEntry::Whole(_) => None,
            SelectionEntry::Items(indices) => Some(indices),
        }
    }
}

/// Mapping from field key to its selection state. Absent keys are not
/// selected.
pub type FieldSelection = BTreeMap<String, SelectionEntry>;

/// The full selection state of a session: shared base, linked flag and
/// per-stage overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFieldSelection {
    /// The selection shared by all stages while linked.
    #[serde(default)]
    pub base: FieldSelection,
    /// When true, every stage's effective selection equals `base`.
    #[serde(default = "default_linked")]
    pub linked: bool,
    /// Per-stage overrides, consulted only while unlinked.
    #[serde(default)]
    pub overrides: BTreeMap<Stage, FieldSelection>,
}

fn default_linked() -> bool {
    true
}

impl Default for StageFieldSelection {
    fn default() -> Self {
        Self {
            base: FieldSelection::new(),
            linked: true,
            overrides: BTreeMap::new(),
        }
    }
}

impl StageFieldSelection {
    /// The effective selection for a stage.
    ///
    /// Linked: always `base`, regardless of any override content.
    /// Unlinked: the stage's override if present, else `base`.
    pub fn effective(&self, stage: Stage) -> &FieldSelection {
        if self.linked {
            return &self.base;
        }
        self.overrides.get(&stage).unwrap_or(&self.base)
    }

    /// Replaces a stage's selection.
    ///
    /// While linked this mutates `base` and therefore propagates to every
    /// stage; while unlinked it only touches the stage's override entry.
    pub fn set_selection(&mut self, stage: Stage, selection: FieldSelection) {
        if self.linked {
            self.base = selection;
        } else {
            self.overrides.insert(stage, selection);
        }
    }

    /// Switches linking on or off.
    ///
    /// Turning linking on adopts the active stage's effective selection as
    /// the new `base` and discards all overrides. Turning it off first
    /// snapshots each stage's current effective selection into its
    /// override entry, so the moment of unlinking is observationally a
    /// no-op.
    pub fn set_linked(&mut self, linked: bool, active_stage: Stage) {
        if linked == self.linked {
            return;
        }
        if linked {
            self.base = self.effective(active_stage).clone();
            self.overrides.clear();
        } else {
            let snapshots: BTreeMap<Stage, FieldSelection> = Stage::iter()
                .map(|stage| (stage, self.effective(stage).clone()))
                .collect();
            self.overrides = snapshots;
        }
        self.linked = linked;
    }
}

/// Resolves a selection against a concrete document.
///
/// Walks the schema in order; a field is included when its entry selects
/// something. Missing or malformed source values produce empty content —
/// a partially-loaded document is never an error.
pub fn resolve_fields(
    selection: &FieldSelection,
    document: &Value,
    schema: &[FieldDescriptor],
) -> Vec<PopulatedField> {
    let mut populated = Vec::new();
    for descriptor in schema {
        let Some(entry) = selection.get(&descriptor.key) else {
            continue;
        };
        if !entry.is_selected() {
            continue;
        }
        let indices = match descriptor.kind {
            FieldKind::List => entry.indices(),
            _ => None,
        };
        let content = character::field_value(document, &descriptor.path)
            .map(|value| character::format_value(value, descriptor.kind, indices))
            .unwrap_or_default();
        populated.push(PopulatedField::new(
            descriptor.key.clone(),
            descriptor.label.clone(),
            content,
        ));
    }
    populated
}
