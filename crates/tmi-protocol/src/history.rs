use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::cell::CellPatch;
use crate::ids::OperationId;
use crate::ids::UserId;

/// An applied mutation, kept on a session's undo/redo stacks (spec.md §3, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op_id: OperationId,
    pub origin_user_id: UserId,
    pub received_at: DateTime<Utc>,
    pub cell_patches: Vec<CellPatch>,
    pub applied_update_vector: u64,
}

impl OperationRecord {
    /// The inverse patch list used by undo/redo: `add` <-> `remove` with
    /// before/after swapped, `update` with before/after swapped.
    pub fn inverse_patches(&self) -> Vec<CellPatch> {
        self.cell_patches
            .iter()
            .map(|p| p.inverse())
            .collect()
    }
}

impl crate::cell::CellPatch {
    fn inverse(&self) -> crate::cell::CellPatch {
        use crate::cell::PatchKind::*;
        match self.kind {
            Add => crate::cell::CellPatch {
                cell_id: self.cell_id.clone(),
                kind: Remove,
                before: self.after.clone(),
                after: None,
            },
            Remove => crate::cell::CellPatch {
                cell_id: self.cell_id.clone(),
                kind: Add,
                before: None,
                after: self.before.clone(),
            },
            Update => crate::cell::CellPatch {
                cell_id: self.cell_id.clone(),
                kind: Update,
                before: self.after.clone(),
                after: self.before.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::cell::PatchKind;
    use crate::ids::CellId;
    use serde_json::json;

    fn cell(id: &str) -> Cell {
        Cell {
            id: CellId::from(id),
            cell_type: "node".to_string(),
            source: None,
            target: None,
            data: json!({}),
        }
    }

    #[test]
    fn inverse_of_add_is_remove() {
        let record = OperationRecord {
            op_id: OperationId::from("op1"),
            origin_user_id: UserId::from("alice"),
            received_at: Utc::now(),
            cell_patches: vec![CellPatch {
                cell_id: CellId::from("c1"),
                kind: PatchKind::Add,
                before: None,
                after: Some(cell("c1")),
            }],
            applied_update_vector: 1,
        };
        let inv = record.inverse_patches();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv[0].kind, PatchKind::Remove);
        assert_eq!(inv[0].before, Some(cell("c1")));
        assert!(inv[0].after.is_none());
    }

    #[test]
    fn double_inverse_round_trips() {
        let patch = CellPatch {
            cell_id: CellId::from("c1"),
            kind: PatchKind::Update,
            before: Some(cell("before")),
            after: Some(cell("after")),
        };
        let once = patch.inverse();
        let twice = once.inverse();
        assert_eq!(twice, patch);
    }
}
