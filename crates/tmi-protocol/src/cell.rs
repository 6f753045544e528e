use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::CellId;

/// A node or edge inside a diagram.
///
/// The core treats a cell's `data` as opaque beyond the fields needed to
/// detect dangling edges (`source`/`target`); everything else is forwarded
/// verbatim to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    #[serde(rename = "type")]
    pub cell_type: String,
    /// Edge source cell id, if this cell is an edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CellId>,
    /// Edge target cell id, if this cell is an edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<CellId>,
    /// Geometry/data payload and any metadata, opaque to the core.
    #[serde(default)]
    pub data: Value,
}

impl Cell {
    pub fn is_edge(&self) -> bool {
        self.source.is_some() || self.target.is_some()
    }
}

/// The three kinds of mutation a `diagram_operation` patch can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    Add,
    Update,
    Remove,
}

impl std::fmt::Display for PatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatchKind::Add => "add",
            PatchKind::Update => "update",
            PatchKind::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// One element of a `diagram_operation`'s `cell_patches` list (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellPatch {
    pub cell_id: CellId,
    pub kind: PatchKind,
    /// Pre-image, present on `update` and `remove` once recorded in an
    /// `OperationRecord` for undo; absent on the wire for `add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Cell>,
    /// Post-image; required for `add`/`update`, absent for `remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Cell>,
}
