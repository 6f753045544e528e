//! OperationApplier (spec.md §4.5): validates, conflict-checks, applies, and
//! post-checks a `diagram_operation`'s cell patches against a working
//! diagram. Pure and synchronous by design — §5 calls out "no suspension
//! inside OperationApplier".

use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;

use tmi_protocol::Cell;
use tmi_protocol::CellPatch;
use tmi_protocol::Diagram;
use tmi_protocol::OperationId;
use tmi_protocol::PatchKind;
use tmi_protocol::UserId;

use tmi_protocol::OperationRecord;

/// A successfully applied operation.
pub struct ApplyOutcome {
    pub diagram: Diagram,
    pub record: OperationRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// The client's observed `update_vector` is behind the authoritative
    /// one; caller should emit `state_correction` and drop the operation.
    StateConflict { authoritative_update_vector: u64 },
    /// Shape/semantic rejection (duplicate target, unknown cell, dangling
    /// edge, cell-count ceiling); caller should emit `error` to the
    /// originator. The working diagram is unchanged.
    Validation(String),
}

/// Apply `patches` (in order) to `diagram`, producing a new diagram with an
/// incremented `update_vector` plus the `OperationRecord` to push onto the
/// originator's undo stack.
///
/// `client_update_vector` is `None` for operations synthesized internally
/// (undo/redo inverses), which are always applied against the current
/// working diagram rather than re-checked for staleness.
pub fn apply(
    diagram: &Diagram,
    op_id: OperationId,
    origin: UserId,
    client_update_vector: Option<u64>,
    patches: Vec<CellPatch>,
    max_cells: usize,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, ApplyError> {
    if let Some(observed) = client_update_vector {
        if observed < diagram.update_vector {
            return Err(ApplyError::StateConflict {
                authoritative_update_vector: diagram.update_vector,
            });
        }
    }

    validate_shape(diagram, &patches)?;

    let mut next_cells = diagram.cells.clone();
    let mut recorded = Vec::with_capacity(patches.len());
    for patch in &patches {
        let before = next_cells.iter().find(|c| c.id == patch.cell_id).cloned();
        match patch.kind {
            PatchKind::Add => {
                let after = patch
                    .after
                    .clone()
                    .ok_or_else(|| ApplyError::Validation("add patch missing `after`".into()))?;
                next_cells.push(after);
            }
            PatchKind::Update => {
                let after = patch.after.clone().ok_or_else(|| {
                    ApplyError::Validation("update patch missing `after`".into())
                })?;
                let slot = next_cells
                    .iter_mut()
                    .find(|c| c.id == patch.cell_id)
                    .ok_or_else(|| {
                        ApplyError::Validation(format!("unknown cell {}", patch.cell_id))
                    })?;
                *slot = after;
            }
            PatchKind::Remove => {
                let before_index = next_cells
                    .iter()
                    .position(|c| c.id == patch.cell_id)
                    .ok_or_else(|| {
                        ApplyError::Validation(format!("unknown cell {}", patch.cell_id))
                    })?;
                next_cells.remove(before_index);
            }
        }
        recorded.push(CellPatch {
            cell_id: patch.cell_id.clone(),
            kind: patch.kind,
            before,
            after: patch.after.clone(),
        });
    }

    if next_cells.len() > max_cells {
        return Err(ApplyError::Validation(format!(
            "diagram would exceed max_cells ({max_cells})"
        )));
    }

    if let Some(dangling) = find_dangling_edge(&next_cells) {
        return Err(ApplyError::Validation(format!(
            "operation would leave edge {dangling} with a missing endpoint"
        )));
    }

    let mut diagram = diagram.clone();
    diagram.cells = next_cells;
    diagram.update_vector += 1;
    diagram.last_modified = now;

    let record = OperationRecord {
        op_id,
        origin_user_id: origin,
        received_at: now,
        cell_patches: recorded,
        applied_update_vector: diagram.update_vector,
    };

    Ok(ApplyOutcome { diagram, record })
}

fn validate_shape(diagram: &Diagram, patches: &[CellPatch]) -> Result<(), ApplyError> {
    let mut targeted = HashSet::new();
    for patch in patches {
        if !targeted.insert(patch.cell_id.clone()) {
            return Err(ApplyError::Validation(format!(
                "duplicate patch target {}",
                patch.cell_id
            )));
        }
        let exists = diagram.contains_cell(&patch.cell_id);
        match patch.kind {
            PatchKind::Add if exists => {
                return Err(ApplyError::Validation(format!(
                    "add patch names existing cell {}",
                    patch.cell_id
                )));
            }
            PatchKind::Update | PatchKind::Remove if !exists => {
                return Err(ApplyError::Validation(format!(
                    "{} patch names unknown cell {}",
                    patch.kind, patch.cell_id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn find_dangling_edge(cells: &[Cell]) -> Option<String> {
    let ids: HashSet<_> = cells.iter().map(|c| c.id.clone()).collect();
    cells.iter().find_map(|cell| {
        if !cell.is_edge() {
            return None;
        }
        let source_missing = cell.source.as_ref().is_some_and(|s| !ids.contains(s));
        let target_missing = cell.target.as_ref().is_some_and(|t| !ids.contains(t));
        (source_missing || target_missing).then(|| cell.id.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tmi_protocol::CellId;
    use tmi_protocol::ThreatModelId;

    fn node(id: &str) -> Cell {
        Cell {
            id: CellId::from(id),
            cell_type: "node".to_string(),
            source: None,
            target: None,
            data: json!({}),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Cell {
        Cell {
            id: CellId::from(id),
            cell_type: "edge".to_string(),
            source: Some(CellId::from(source)),
            target: Some(CellId::from(target)),
            data: json!({}),
        }
    }

    fn empty_diagram() -> Diagram {
        Diagram::empty(
            tmi_protocol::DiagramId::from("d1"),
            ThreatModelId::from("tm1"),
        )
    }

    // S1 from spec.md §8.
    #[test]
    fn happy_path_add_cell() {
        let diagram = empty_diagram();
        let patches = vec![CellPatch {
            cell_id: CellId::from("c1"),
            kind: PatchKind::Add,
            before: None,
            after: Some(node("c1")),
        }];
        let outcome = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            Some(0),
            patches,
            1000,
            Utc::now(),
        )
        .expect("applies");
        assert_eq!(outcome.diagram.update_vector, 1);
        assert_eq!(outcome.diagram.cells.len(), 1);
    }

    // S2 from spec.md §8.
    #[test]
    fn stale_vector_is_rejected() {
        let mut diagram = empty_diagram();
        diagram.update_vector = 7;
        let patches = vec![CellPatch {
            cell_id: CellId::from("c1"),
            kind: PatchKind::Add,
            before: None,
            after: Some(node("c1")),
        }];
        let err = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            Some(5),
            patches,
            1000,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ApplyError::StateConflict {
                authoritative_update_vector: 7
            }
        );
    }

    #[test]
    fn rejects_dangling_edge() {
        let diagram = empty_diagram();
        let patches = vec![CellPatch {
            cell_id: CellId::from("e1"),
            kind: PatchKind::Add,
            before: None,
            after: Some(edge("e1", "missing-src", "missing-dst")),
        }];
        let err = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            None,
            patches,
            1000,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
        assert_eq!(diagram.cells.len(), 0);
    }

    #[test]
    fn rejects_duplicate_patch_target() {
        let diagram = empty_diagram();
        let patches = vec![
            CellPatch {
                cell_id: CellId::from("c1"),
                kind: PatchKind::Add,
                before: None,
                after: Some(node("c1")),
            },
            CellPatch {
                cell_id: CellId::from("c1"),
                kind: PatchKind::Remove,
                before: None,
                after: None,
            },
        ];
        let err = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            None,
            patches,
            1000,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
    }

    #[test]
    fn rejects_add_of_existing_cell_id() {
        let mut diagram = empty_diagram();
        diagram.cells.push(node("c1"));
        let patches = vec![CellPatch {
            cell_id: CellId::from("c1"),
            kind: PatchKind::Add,
            before: None,
            after: Some(node("c1")),
        }];
        let err = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            None,
            patches,
            1000,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
    }

    #[test]
    fn enforces_max_cells_ceiling() {
        let diagram = empty_diagram();
        let patches = vec![CellPatch {
            cell_id: CellId::from("c1"),
            kind: PatchKind::Add,
            before: None,
            after: Some(node("c1")),
        }];
        let err = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            None,
            patches,
            0,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(_)));
    }

    #[test]
    fn undo_then_redo_is_a_content_no_op() {
        let diagram = empty_diagram();
        let add = apply(
            &diagram,
            OperationId::from("op1"),
            UserId::from("alice"),
            Some(0),
            vec![CellPatch {
                cell_id: CellId::from("c1"),
                kind: PatchKind::Add,
                before: None,
                after: Some(node("c1")),
            }],
            1000,
            Utc::now(),
        )
        .expect("apply add");

        let undo = apply(
            &add.diagram,
            OperationId::from("op1-undo"),
            UserId::from("alice"),
            None,
            add.record.inverse_patches(),
            1000,
            Utc::now(),
        )
        .expect("apply undo");
        assert_eq!(undo.diagram.cells.len(), 0);

        let redo = apply(
            &undo.diagram,
            OperationId::from("op1-redo"),
            UserId::from("alice"),
            None,
            undo.record.inverse_patches(),
            1000,
            Utc::now(),
        )
        .expect("apply redo");
        assert_eq!(redo.diagram.cells, diagram_with_c1().cells);
    }

    fn diagram_with_c1() -> Diagram {
        let mut d = empty_diagram();
        d.cells.push(node("c1"));
        d
    }
}
