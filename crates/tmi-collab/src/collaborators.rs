use async_trait::async_trait;

use tmi_protocol::Diagram;
use tmi_protocol::DiagramId;
use tmi_protocol::Role;
use tmi_protocol::ThreatModelId;
use tmi_protocol::UserId;

/// External collaborator (spec.md §1, §2): given a user and a diagram,
/// returns the role inherited from the diagram's parent threat model, or
/// `None` if the user has no access at all.
///
/// Implementations are expected to sit behind a cache (spec.md §9); the
/// core only ever pulls, on join and on its periodic refresh (spec.md §4.3).
#[async_trait]
pub trait AuthorizationResolver: Send + Sync {
    async fn resolve(
        &self,
        user: &UserId,
        threat_model_id: &ThreatModelId,
        diagram_id: &DiagramId,
    ) -> Option<Role>;
}

/// Outcome of a failed compare-and-swap: the store hands back what it has so
/// the caller can reconcile (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct CasConflict {
    pub remote: Diagram,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("compare-and-swap conflict")]
    Conflict(CasConflict),
    #[error("diagram not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator (spec.md §1, §2, §6): read and CAS-update the
/// authoritative diagram document keyed by `(threat_model_id, diagram_id)`.
#[async_trait]
pub trait DiagramStore: Send + Sync {
    async fn load(
        &self,
        threat_model_id: &ThreatModelId,
        diagram_id: &DiagramId,
    ) -> Result<Diagram, StoreError>;

    /// Persist `diagram` iff the store's current `update_vector` for this key
    /// equals `expected_update_vector`. On success the store's vector becomes
    /// `diagram.update_vector`.
    async fn compare_and_swap(
        &self,
        threat_model_id: &ThreatModelId,
        diagram: &Diagram,
        expected_update_vector: u64,
    ) -> Result<(), StoreError>;
}
