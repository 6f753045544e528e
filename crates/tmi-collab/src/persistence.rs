//! PersistenceCoordinator (spec.md §4.7): commits the working diagram to
//! `DiagramStore` via optimistic CAS, on a schedule and on an
//! operation-count threshold, and reconciles when the CAS loses a race with
//! a concurrent external writer.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;
use tracing::info;
use tracing::warn;

use tmi_protocol::Diagram;
use tmi_protocol::ThreatModelId;

use crate::collaborators::CasConflict;
use crate::collaborators::DiagramStore;
use crate::collaborators::StoreError;
use crate::util::backoff;

pub enum SaveOutcome {
    Saved { update_vector: u64 },
    /// A concurrent external writer won the race; the caller must adopt
    /// `conflict.remote` as the new working copy and reconcile pending state.
    Conflict(CasConflict),
    Failed,
}

pub struct PersistenceCoordinator {
    store: Arc<dyn DiagramStore>,
    saved_update_vector: u64,
    pending_ops_since_save: usize,
    save_op_threshold: usize,
    save_backoff_cap: Duration,
    consecutive_failures: u32,
    save_in_flight: bool,
}

impl PersistenceCoordinator {
    pub fn new(
        store: Arc<dyn DiagramStore>,
        initial_update_vector: u64,
        save_op_threshold: usize,
        save_backoff_cap: Duration,
    ) -> Self {
        Self {
            store,
            saved_update_vector: initial_update_vector,
            pending_ops_since_save: 0,
            save_op_threshold,
            save_backoff_cap,
            consecutive_failures: 0,
            save_in_flight: false,
        }
    }

    pub fn record_applied_operation(&mut self) {
        self.pending_ops_since_save += 1;
    }

    /// Whether the operation-count threshold has been crossed (spec.md
    /// §4.7's "pendingOperationsSinceSave exceeds a threshold" trigger).
    /// Does not fire while a save is already outstanding — invariant 6.
    pub fn threshold_crossed(&self) -> bool {
        !self.save_in_flight && self.pending_ops_since_save >= self.save_op_threshold
    }

    pub fn save_in_flight(&self) -> bool {
        self.save_in_flight
    }

    /// Attempt a CAS save. A second call while one is already in flight is a
    /// caller bug (the `Session` serializer never calls this concurrently
    /// with itself), so it coalesces into a no-op failure rather than racing.
    pub async fn save(&mut self, threat_model_id: &ThreatModelId, diagram: &Diagram) -> SaveOutcome {
        if self.save_in_flight {
            return SaveOutcome::Failed;
        }
        self.save_in_flight = true;
        let result = self
            .store
            .compare_and_swap(threat_model_id, diagram, self.saved_update_vector)
            .await;
        self.save_in_flight = false;

        match result {
            Ok(()) => {
                self.saved_update_vector = diagram.update_vector;
                self.pending_ops_since_save = 0;
                self.consecutive_failures = 0;
                info!(update_vector = diagram.update_vector, "diagram saved");
                SaveOutcome::Saved {
                    update_vector: diagram.update_vector,
                }
            }
            Err(StoreError::Conflict(conflict)) => {
                warn!("save lost CAS race, reconciling against store");
                SaveOutcome::Conflict(conflict)
            }
            Err(other) => {
                self.consecutive_failures += 1;
                let delay = backoff(self.consecutive_failures, self.save_backoff_cap);
                error!(error = %other, retry_in = ?delay, "scheduled save failed");
                SaveOutcome::Failed
            }
        }
    }

    /// After a `Conflict`, the caller has adopted `remote` as the new working
    /// diagram; record it as the new saved baseline.
    pub fn adopt_remote(&mut self, remote: &Diagram) {
        self.saved_update_vector = remote.update_vector;
        self.pending_ops_since_save = 0;
    }

    /// Save attempted during Draining, bounded by `deadline` (spec.md §4.7's
    /// save-on-end). Unlike the scheduled path this does not retry: the
    /// session is on its way out either way.
    pub async fn save_on_end(
        &mut self,
        threat_model_id: &ThreatModelId,
        diagram: &Diagram,
        deadline: Duration,
    ) -> Result<(), String> {
        let attempt = tokio::time::timeout(
            deadline,
            self.store
                .compare_and_swap(threat_model_id, diagram, self.saved_update_vector),
        )
        .await;

        match attempt {
            Ok(Ok(())) => {
                self.saved_update_vector = diagram.update_vector;
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("save-on-end deadline exceeded".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDiagramStore;
    use tmi_protocol::DiagramId;

    fn diagram(update_vector: u64) -> (ThreatModelId, Diagram) {
        let tm = ThreatModelId::from("tm1");
        let mut d = Diagram::empty(DiagramId::from("d1"), tm.clone());
        d.update_vector = update_vector;
        (tm, d)
    }

    #[tokio::test]
    async fn successful_save_resets_pending_count_and_threshold() {
        let (tm, diagram) = diagram(0);
        let store: Arc<dyn DiagramStore> = Arc::new(FakeDiagramStore::new(diagram.clone()));
        let mut coordinator = PersistenceCoordinator::new(store, 0, 2, Duration::from_secs(30));

        coordinator.record_applied_operation();
        coordinator.record_applied_operation();
        assert!(coordinator.threshold_crossed());

        let (tm2, mut saved) = (tm, diagram);
        saved.update_vector = 1;
        match coordinator.save(&tm2, &saved).await {
            SaveOutcome::Saved { update_vector } => assert_eq!(update_vector, 1),
            _ => panic!("expected a successful save"),
        }
        assert!(!coordinator.threshold_crossed());
        assert!(!coordinator.save_in_flight());
    }

    #[tokio::test]
    async fn losing_the_cas_race_surfaces_the_remote_diagram() {
        let (tm, diagram) = diagram(0);
        let store = Arc::new(FakeDiagramStore::new(diagram.clone()));
        let mut remote = diagram.clone();
        remote.update_vector = 5;
        store.force_set(remote.clone());

        let store: Arc<dyn DiagramStore> = store;
        let mut coordinator = PersistenceCoordinator::new(store, 0, 50, Duration::from_secs(30));

        let mut ours = diagram;
        ours.update_vector = 1;
        match coordinator.save(&tm, &ours).await {
            SaveOutcome::Conflict(conflict) => assert_eq!(conflict.remote.update_vector, 5),
            _ => panic!("expected a CAS conflict"),
        }

        coordinator.adopt_remote(&remote);
        assert!(!coordinator.threshold_crossed());
    }

    #[tokio::test]
    async fn save_on_end_times_out_against_a_stalled_store() {
        struct StallingStore;

        #[async_trait::async_trait]
        impl DiagramStore for StallingStore {
            async fn load(&self, _: &ThreatModelId, _: &DiagramId) -> Result<Diagram, StoreError> {
                unreachable!("not exercised by this test")
            }

            async fn compare_and_swap(&self, _: &ThreatModelId, _: &Diagram, _: u64) -> Result<(), StoreError> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let (tm, diagram) = diagram(0);
        let store: Arc<dyn DiagramStore> = Arc::new(StallingStore);
        let mut coordinator = PersistenceCoordinator::new(store, 0, 50, Duration::from_secs(30));

        let err = coordinator
            .save_on_end(&tm, &diagram, Duration::from_millis(20))
            .await
            .expect_err("deadline should elapse");
        assert!(err.contains("deadline"));
    }
}
