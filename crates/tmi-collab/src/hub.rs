//! Hub (spec.md §4.4): the process-wide registry mapping a `DiagramId` to its
//! running `Session`. Lookups take only a read lock; creating a brand new
//! session is serialized through `creation_lock` so two concurrent
//! first-joiners land on the same actor instead of racing two into
//! existence. Termination is reaped out-of-band through an mpsc channel so
//! the `Hub` never blocks on a `Session`'s own shutdown work.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::info;

use tmi_protocol::AuthorizationChangeEvent;
use tmi_protocol::DiagramId;
use tmi_protocol::SessionLimits;
use tmi_protocol::ThreatModelId;

use crate::collaborators::AuthorizationResolver;
use crate::collaborators::DiagramStore;
use crate::error::Error;
use crate::session::SessionHandle;

pub struct Hub {
    sessions: RwLock<HashMap<DiagramId, SessionHandle>>,
    creation_lock: Mutex<()>,
    authorization: Arc<dyn AuthorizationResolver>,
    store: Arc<dyn DiagramStore>,
    limits: SessionLimits,
    terminated_tx: mpsc::UnboundedSender<DiagramId>,
}

impl Hub {
    pub fn new(
        authorization: Arc<dyn AuthorizationResolver>,
        store: Arc<dyn DiagramStore>,
        limits: SessionLimits,
    ) -> Arc<Self> {
        let (terminated_tx, terminated_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            authorization,
            store,
            limits,
            terminated_tx,
        });
        let reaper = Arc::clone(&hub);
        tokio::spawn(async move { reaper.reap(terminated_rx).await });
        hub
    }

    async fn reap(&self, mut terminated_rx: mpsc::UnboundedReceiver<DiagramId>) {
        while let Some(diagram_id) = terminated_rx.recv().await {
            if self.sessions.write().await.remove(&diagram_id).is_some() {
                info!(%diagram_id, "reaped terminated session from the registry");
            }
        }
    }

    /// Return the running session for `diagram_id`, spawning one (loading
    /// the diagram from the store first) if none exists yet.
    pub async fn session_for(
        &self,
        threat_model_id: &ThreatModelId,
        diagram_id: &DiagramId,
    ) -> Result<SessionHandle, Error> {
        self.create_or_get(threat_model_id, diagram_id).await.map(|(handle, _)| handle)
    }

    /// Like [`Hub::session_for`], but also reports whether this call is the
    /// one that spawned the session — the distinction the REST control
    /// plane's idempotent `POST .../collaborate` needs (spec.md §6, Open
    /// Question 1; the policy for what to do with the answer lives in the
    /// caller, per SPEC_FULL.md/DESIGN.md).
    pub async fn create_or_get(
        &self,
        threat_model_id: &ThreatModelId,
        diagram_id: &DiagramId,
    ) -> Result<(SessionHandle, bool), Error> {
        if let Some(handle) = self.sessions.read().await.get(diagram_id).cloned() {
            return Ok((handle, false));
        }

        let _creation_guard = self.creation_lock.lock().await;
        // Re-check: someone may have created it while we waited for the lock.
        if let Some(handle) = self.sessions.read().await.get(diagram_id).cloned() {
            return Ok((handle, false));
        }

        let diagram = self
            .store
            .load(threat_model_id, diagram_id)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let handle = SessionHandle::spawn(
            diagram_id.clone(),
            threat_model_id.clone(),
            diagram,
            self.limits,
            Arc::clone(&self.authorization),
            Arc::clone(&self.store),
            self.terminated_tx.clone(),
        );
        self.sessions.write().await.insert(diagram_id.clone(), handle.clone());
        info!(%diagram_id, "spawned new session");
        Ok((handle, true))
    }

    /// Look up a session without creating one; used by the transport layer
    /// to distinguish "not joined yet" from "no such diagram" before it
    /// commits to loading anything.
    pub async fn lookup(&self, diagram_id: &DiagramId) -> Option<SessionHandle> {
        self.sessions.read().await.get(diagram_id).cloned()
    }

    pub async fn list_active(&self) -> Vec<DiagramId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Forward an external push-style authorization-invalidation signal
    /// (spec.md §9) to the named diagram's session, if one is running. A
    /// no-op if the diagram has no active session — there is nothing to
    /// invalidate and the next join will resolve authorization fresh anyway.
    pub async fn notify_authorization_changed(&self, diagram_id: &DiagramId, event: AuthorizationChangeEvent) {
        if let Some(handle) = self.lookup(diagram_id).await {
            handle.notify_authorization_changed(event.subject).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeAuthorizationResolver;
    use crate::test_support::FakeDiagramStore;
    use tmi_protocol::Diagram;

    fn make_hub() -> Arc<Hub> {
        make_hub_with_resolver().0
    }

    fn make_hub_with_resolver() -> (Arc<Hub>, Arc<FakeAuthorizationResolver>) {
        let diagram_id = DiagramId::from("d1");
        let threat_model_id = ThreatModelId::from("tm1");
        let diagram = Diagram::empty(diagram_id, threat_model_id);
        let resolver = Arc::new(FakeAuthorizationResolver::new());
        let authorization: Arc<dyn AuthorizationResolver> = Arc::clone(&resolver) as Arc<dyn AuthorizationResolver>;
        let store: Arc<dyn DiagramStore> = Arc::new(FakeDiagramStore::new(diagram));
        (Hub::new(authorization, store, SessionLimits::default()), resolver)
    }

    #[tokio::test]
    async fn session_for_is_idempotent_per_diagram() {
        let hub = make_hub();
        let tm = ThreatModelId::from("tm1");
        let id = DiagramId::from("d1");
        hub.session_for(&tm, &id).await.expect("create");
        hub.session_for(&tm, &id).await.expect("reuse");
        assert_eq!(hub.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_diagram_surfaces_as_persistence_error() {
        let hub = make_hub();
        let tm = ThreatModelId::from("tm1");
        let missing = DiagramId::from("does-not-exist");
        let err = hub.session_for(&tm, &missing).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn lookup_returns_none_before_first_join() {
        let hub = make_hub();
        assert!(hub.lookup(&DiagramId::from("d1")).await.is_none());
    }

    /// A push-style revocation (spec.md §9) reaches a running session
    /// immediately rather than waiting for its periodic refresh tick.
    #[tokio::test]
    async fn authorization_push_signal_disconnects_a_revoked_participant() {
        use crate::test_support::RecordingSink;
        use tmi_protocol::AuthorizationChangeEvent;
        use tmi_protocol::AuthorizationOutcome;
        use tmi_protocol::Role;
        use tmi_protocol::UserId;

        let (hub, resolver) = make_hub_with_resolver();
        let tm = ThreatModelId::from("tm1");
        let id = DiagramId::from("d1");
        let alice = UserId::from("alice");
        resolver.grant(alice.clone(), Role::Writer);

        let session = hub.session_for(&tm, &id).await.expect("session");
        let sink = RecordingSink::new();
        session.join(alice.clone(), Arc::clone(&sink) as Arc<dyn crate::sink::ParticipantSink>).await.expect("join");

        resolver.revoke(&alice);
        hub.notify_authorization_changed(
            &id,
            AuthorizationChangeEvent {
                subject: alice,
                outcome: AuthorizationOutcome::Revoked,
                effective_at: chrono::Utc::now(),
            },
        )
        .await;

        // The session actor processes the ping on its next scheduling slot;
        // yield until it has.
        for _ in 0..100 {
            if sink.disconnected.lock().unwrap().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(sink.disconnected.lock().unwrap().is_some());
    }
}
