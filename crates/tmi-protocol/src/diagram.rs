use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::cell::Cell;
use crate::ids::CellId;
use crate::ids::DiagramId;
use crate::ids::ThreatModelId;

/// The authoritative diagram document (spec.md §3).
///
/// `update_vector` is the compare-and-swap token: every applied operation
/// increments it by exactly one, and `PersistenceCoordinator` uses it to
/// detect concurrent external writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagram {
    pub id: DiagramId,
    pub threat_model_id: ThreatModelId,
    pub cells: Vec<Cell>,
    pub update_vector: u64,
    pub last_modified: DateTime<Utc>,
}

impl Diagram {
    pub fn empty(id: DiagramId, threat_model_id: ThreatModelId) -> Self {
        Self {
            id,
            threat_model_id,
            cells: Vec::new(),
            update_vector: 0,
            last_modified: Utc::now(),
        }
    }

    pub fn find_cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| &c.id == id)
    }

    pub fn contains_cell(&self, id: &CellId) -> bool {
        self.find_cell(id).is_some()
    }
}
