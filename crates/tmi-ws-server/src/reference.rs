//! In-memory reference implementations of the two collaborator traits
//! (spec.md §1, §9) that `tmi-collab` consumes: `AuthorizationResolver` and
//! `DiagramStore`. A real deployment replaces both with clients of the
//! threat-model service's own authorization and persistence layers; these
//! exist only so `tmi-ws-server` is runnable standalone for local/dev use
//! and the `tests/` integration suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tmi_collab::AuthorizationResolver;
use tmi_collab::CasConflict;
use tmi_collab::DiagramStore;
use tmi_collab::StoreError;
use tmi_protocol::Diagram;
use tmi_protocol::DiagramId;
use tmi_protocol::Role;
use tmi_protocol::ThreatModelId;
use tmi_protocol::UserId;

/// Grants every authenticated user a fixed role on every diagram. Good
/// enough for exercising the collaboration core without a real threat-model
/// authorization service in front of it.
pub struct OpenAuthorizationResolver {
    default_role: Role,
    revoked: Mutex<Vec<UserId>>,
}

impl OpenAuthorizationResolver {
    pub fn new(default_role: Role) -> Self {
        Self {
            default_role,
            revoked: Mutex::new(Vec::new()),
        }
    }

    /// Test/demo hook for exercising spec.md §4.3's authorization-refresh
    /// path: after this call, `resolve` returns `None` for `user`.
    pub fn revoke(&self, user: UserId) {
        self.revoked.lock().unwrap().push(user);
    }
}

#[async_trait]
impl AuthorizationResolver for OpenAuthorizationResolver {
    async fn resolve(&self, user: &UserId, _threat_model_id: &ThreatModelId, _diagram_id: &DiagramId) -> Option<Role> {
        if self.revoked.lock().unwrap().iter().any(|u| u == user) {
            return None;
        }
        Some(self.default_role)
    }
}

/// Single-process diagram store keyed by `DiagramId`. `load` auto-vivifies
/// an empty diagram on first reference rather than 404ing, so a WebSocket
/// client can dial an arbitrary diagram id without a prior provisioning
/// step — convenient for local runs, not a stand-in for the real CRUD
/// surface's diagram creation.
#[derive(Default)]
pub struct InMemoryDiagramStore {
    diagrams: Mutex<HashMap<DiagramId, Diagram>>,
}

impl InMemoryDiagramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, diagram: Diagram) {
        self.diagrams.lock().unwrap().insert(diagram.id.clone(), diagram);
    }
}

#[async_trait]
impl DiagramStore for InMemoryDiagramStore {
    async fn load(&self, threat_model_id: &ThreatModelId, diagram_id: &DiagramId) -> Result<Diagram, StoreError> {
        let mut diagrams = self.diagrams.lock().unwrap();
        Ok(diagrams
            .entry(diagram_id.clone())
            .or_insert_with(|| Diagram::empty(diagram_id.clone(), threat_model_id.clone()))
            .clone())
    }

    async fn compare_and_swap(
        &self,
        _threat_model_id: &ThreatModelId,
        diagram: &Diagram,
        expected_update_vector: u64,
    ) -> Result<(), StoreError> {
        let mut diagrams = self.diagrams.lock().unwrap();
        let current = diagrams.get(&diagram.id).cloned();
        match current {
            Some(current) if current.update_vector != expected_update_vector => {
                Err(StoreError::Conflict(CasConflict { remote: current }))
            }
            _ => {
                diagrams.insert(diagram.id.clone(), diagram.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_auto_vivifies_unknown_diagrams() {
        let store = InMemoryDiagramStore::new();
        let tm = ThreatModelId::from("tm1");
        let id = DiagramId::from("d1");
        let diagram = store.load(&tm, &id).await.expect("auto-vivified");
        assert_eq!(diagram.update_vector, 0);
        assert!(diagram.cells.is_empty());
    }

    #[tokio::test]
    async fn cas_rejects_stale_vector() {
        let store = InMemoryDiagramStore::new();
        let tm = ThreatModelId::from("tm1");
        let id = DiagramId::from("d1");
        let mut diagram = store.load(&tm, &id).await.unwrap();
        diagram.update_vector = 1;
        store.compare_and_swap(&tm, &diagram, 0).await.expect("first save");

        let stale = diagram.clone();
        let err = store.compare_and_swap(&tm, &stale, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn revoked_user_loses_access() {
        let resolver = OpenAuthorizationResolver::new(Role::Writer);
        let tm = ThreatModelId::from("tm1");
        let id = DiagramId::from("d1");
        let user = UserId::from("alice");
        assert_eq!(resolver.resolve(&user, &tm, &id).await, Some(Role::Writer));
        resolver.revoke(user.clone());
        assert_eq!(resolver.resolve(&user, &tm, &id).await, None);
    }
}
