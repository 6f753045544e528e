//! In-memory fakes of the two external collaborator traits, plus a
//! recording `ParticipantSink`. Shared between this crate's own unit tests
//! and the `tests/` integration suite via the `test-support` feature (see
//! this crate's `Cargo.toml` dev-dependency on itself).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use tmi_protocol::Diagram;
use tmi_protocol::DiagramId;
use tmi_protocol::Role;
use tmi_protocol::ThreatModelId;
use tmi_protocol::UserId;
use tmi_wire::OutboundMessage;

use crate::collaborators::AuthorizationResolver;
use crate::collaborators::CasConflict;
use crate::collaborators::DiagramStore;
use crate::collaborators::StoreError;
use crate::sink::DisconnectReason;
use crate::sink::ParticipantSink;
use crate::sink::SendError;

/// A roster of grants a test can mutate at will, standing in for whatever
/// sits behind the real `AuthorizationResolver` (spec.md §9's external
/// authorization service).
#[derive(Default)]
pub struct FakeAuthorizationResolver {
    roles: Mutex<HashMap<UserId, Role>>,
}

impl FakeAuthorizationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user: UserId, role: Role) {
        self.roles.lock().unwrap().insert(user, role);
    }

    pub fn revoke(&self, user: &UserId) {
        self.roles.lock().unwrap().remove(user);
    }
}

#[async_trait]
impl AuthorizationResolver for FakeAuthorizationResolver {
    async fn resolve(&self, user: &UserId, _threat_model_id: &ThreatModelId, _diagram_id: &DiagramId) -> Option<Role> {
        self.roles.lock().unwrap().get(user).copied()
    }
}

/// A single-diagram in-memory store with real compare-and-swap semantics,
/// standing in for the real `DiagramStore` (spec.md §9's external document
/// store).
pub struct FakeDiagramStore {
    state: Mutex<HashMap<DiagramId, Diagram>>,
}

impl FakeDiagramStore {
    pub fn new(diagram: Diagram) -> Self {
        let mut state = HashMap::new();
        state.insert(diagram.id.clone(), diagram);
        Self { state: Mutex::new(state) }
    }

    /// Write a new authoritative value directly, bypassing CAS — used by
    /// tests that simulate a concurrent external writer.
    pub fn force_set(&self, diagram: Diagram) {
        self.state.lock().unwrap().insert(diagram.id.clone(), diagram);
    }
}

#[async_trait]
impl DiagramStore for FakeDiagramStore {
    async fn load(&self, _threat_model_id: &ThreatModelId, diagram_id: &DiagramId) -> Result<Diagram, StoreError> {
        self.state
            .lock()
            .unwrap()
            .get(diagram_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn compare_and_swap(
        &self,
        _threat_model_id: &ThreatModelId,
        diagram: &Diagram,
        expected_update_vector: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let current = state.get(&diagram.id).cloned().ok_or(StoreError::NotFound)?;
        if current.update_vector != expected_update_vector {
            return Err(StoreError::Conflict(CasConflict { remote: current }));
        }
        state.insert(diagram.id.clone(), diagram.clone());
        Ok(())
    }
}

/// Captures every message sent to it instead of delivering it anywhere, so
/// tests can assert on what a `Session` tried to say to a participant.
/// `disconnect` is recorded rather than acted on for the same reason.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(Option<UserId>, OutboundMessage)>>,
    pub disconnected: Mutex<Option<(DisconnectReason, Option<OutboundMessage>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl ParticipantSink for RecordingSink {
    fn try_send(&self, user_for_envelope: Option<UserId>, message: OutboundMessage) -> Result<(), SendError> {
        self.sent.lock().unwrap().push((user_for_envelope, message));
        Ok(())
    }

    fn disconnect(&self, reason: DisconnectReason, final_message: Option<OutboundMessage>) {
        *self.disconnected.lock().unwrap() = Some((reason, final_message));
    }
}
