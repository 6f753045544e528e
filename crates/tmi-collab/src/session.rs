//! Session (spec.md §4.3): the per-diagram actor. One task owns all of a
//! diagram's collaboration state — participants, host, presenter, undo/redo
//! stacks, the working diagram — and processes every inbound message and
//! timer tick strictly serially, so no lock is ever held around any of it
//! (spec.md §5, §9).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::error;
use tracing::info;
use tracing::warn;

use tmi_protocol::Diagram;
use tmi_protocol::DiagramId;
use tmi_protocol::OperationId;
use tmi_protocol::OperationRecord;
use tmi_protocol::ParticipantRecord;
use tmi_protocol::SessionLimits;
use tmi_protocol::ThreatModelId;
use tmi_protocol::UserId;

use tmi_wire::AuthorizationDeniedPayload;
use tmi_wire::ChangePresenterPayload;
use tmi_wire::CurrentPresenterPayload;
use tmi_wire::DiagramOperationPayload;
use tmi_wire::ErrorPayload;
use tmi_wire::HistoryKind;
use tmi_wire::HistoryOperationPayload;
use tmi_wire::InboundMessage;
use tmi_wire::OutboundMessage;
use tmi_wire::ParticipantJoinedPayload;
use tmi_wire::ParticipantLeftPayload;
use tmi_wire::ParticipantSummary;
use tmi_wire::ParticipantsUpdatePayload;
use tmi_wire::PresenterDeniedPayload;
use tmi_wire::PresenterRequestedPayload;
use tmi_wire::RemoveParticipantPayload;
use tmi_wire::ResyncResponsePayload;
use tmi_wire::SessionEndedPayload;
use tmi_wire::StateCorrectionPayload;
use tmi_wire::StateCorrectionReason;

use crate::authority;
use crate::authority::Decision;
use crate::authority::SenderContext;
use crate::collaborators::AuthorizationResolver;
use crate::collaborators::CasConflict;
use crate::collaborators::DiagramStore;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::operation_applier;
use crate::operation_applier::ApplyError;
use crate::operation_applier::ApplyOutcome;
use crate::persistence::PersistenceCoordinator;
use crate::persistence::SaveOutcome;
use crate::sink::DisconnectReason;
use crate::sink::ParticipantSink;
use crate::sink::SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Forming,
    Active,
    Draining,
    Terminated,
}

enum Command {
    Join {
        user: UserId,
        sink: Arc<dyn ParticipantSink>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Inbound {
        user: UserId,
        message: InboundMessage,
    },
    Leave {
        user: UserId,
    },
    /// External push-style invalidation signal (spec.md §9): re-check one
    /// participant's authorization immediately instead of waiting for the
    /// next periodic refresh. A missed signal never violates an invariant,
    /// only delays detection — so this is fire-and-forget from the caller's
    /// side.
    AuthorizationPing {
        user: UserId,
    },
    CheckDenylist {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    ForceEnd,
}

/// The REST control plane's view of a running session (spec.md §6's
/// `CollaborationSession` summary), returned by [`SessionHandle::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub diagram_id: DiagramId,
    pub phase: Phase,
    pub host: Option<UserId>,
    pub presenter: Option<UserId>,
    pub participant_count: usize,
    pub update_vector: u64,
    pub created_at: DateTime<Utc>,
}

/// A cheap, cloneable reference to a running session's inbox. This is the
/// single serialization point called out in spec.md §5 — every method here
/// just enqueues a command and returns.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Spawn a new session actor for `diagram` and return a handle to it.
    /// `terminated` is notified with `diagram_id` once the session reaches
    /// [`Phase::Terminated`], so `Hub` can reap its registry entry without
    /// ever blocking on this session's own work (spec.md §4.4).
    pub fn spawn(
        diagram_id: DiagramId,
        threat_model_id: ThreatModelId,
        diagram: Diagram,
        limits: SessionLimits,
        authorization: Arc<dyn AuthorizationResolver>,
        store: Arc<dyn DiagramStore>,
        terminated: mpsc::UnboundedSender<DiagramId>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let state = SessionState::new(diagram_id, threat_model_id, diagram, limits, authorization, store);
        tokio::spawn(run(state, rx, terminated));
        Self { tx }
    }

    pub async fn join(&self, user: UserId, sink: Arc<dyn ParticipantSink>) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Join {
                user,
                sink,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::SessionGone)?;
        reply_rx.await.map_err(|_| Error::SessionGone)?
    }

    pub async fn dispatch(&self, user: UserId, message: InboundMessage) -> Result<(), Error> {
        self.tx
            .send(Command::Inbound { user, message })
            .await
            .map_err(|_| Error::SessionGone)
    }

    pub async fn leave(&self, user: UserId) {
        let _ = self.tx.send(Command::Leave { user }).await;
    }

    /// Ask this session to immediately re-check `user`'s authorization
    /// rather than wait for the next periodic refresh (spec.md §9's
    /// optional push-invalidation signal). The surrounding service calls
    /// this when it knows a role changed out-of-band (e.g. a threat-model
    /// permission edit). Best-effort: dropped silently if the session has
    /// already gone away.
    pub async fn notify_authorization_changed(&self, user: UserId) {
        let _ = self.tx.send(Command::AuthorizationPing { user }).await;
    }

    /// Whether `user` was explicitly removed from this session and is
    /// barred from rejoining it (spec.md §6: handshake rejects with 409).
    /// Returns `false` if the session has already gone away.
    pub async fn is_denylisted(&self, user: &UserId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::CheckDenylist {
                user: user.clone(),
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// The REST control plane's snapshot of this session, or `None` if it
    /// has already terminated.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply: reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    /// Owner-issued `DELETE` on the REST control plane (spec.md §6):
    /// begins draining regardless of who currently holds host, since the
    /// caller has already been authorized by the surrounding service.
    pub async fn force_end(&self) {
        let _ = self.tx.send(Command::ForceEnd).await;
    }
}

struct SessionState {
    diagram_id: DiagramId,
    threat_model_id: ThreatModelId,
    diagram: Diagram,
    participants: HashMap<UserId, ParticipantRecord>,
    sinks: HashMap<UserId, Arc<dyn ParticipantSink>>,
    denylist: HashSet<UserId>,
    host: Option<UserId>,
    presenter: Option<UserId>,
    undo_stacks: HashMap<UserId, Vec<OperationRecord>>,
    redo_stacks: HashMap<UserId, Vec<OperationRecord>>,
    slow_consumer_events: HashMap<UserId, Vec<DateTime<Utc>>>,
    phase: Phase,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    limits: SessionLimits,
    authorization: Arc<dyn AuthorizationResolver>,
    persistence: PersistenceCoordinator,
}

impl SessionState {
    fn new(
        diagram_id: DiagramId,
        threat_model_id: ThreatModelId,
        diagram: Diagram,
        limits: SessionLimits,
        authorization: Arc<dyn AuthorizationResolver>,
        store: Arc<dyn DiagramStore>,
    ) -> Self {
        let persistence = PersistenceCoordinator::new(
            store,
            diagram.update_vector,
            limits.save_op_threshold,
            limits.save_backoff_cap,
        );
        let now = Utc::now();
        Self {
            diagram_id,
            threat_model_id,
            diagram,
            participants: HashMap::new(),
            sinks: HashMap::new(),
            denylist: HashSet::new(),
            host: None,
            presenter: None,
            undo_stacks: HashMap::new(),
            redo_stacks: HashMap::new(),
            slow_consumer_events: HashMap::new(),
            phase: Phase::Forming,
            created_at: now,
            last_activity_at: now,
            limits,
            authorization,
            persistence,
        }
    }

    // -- join / leave --------------------------------------------------

    async fn handle_join(&mut self, user: UserId, sink: Arc<dyn ParticipantSink>) -> Result<(), Error> {
        if matches!(self.phase, Phase::Draining | Phase::Terminated) {
            return Err(Error::Validation("session is ending".into()));
        }
        if self.denylist.contains(&user) {
            sink.disconnect(
                DisconnectReason::AuthorizationDenied,
                Some(OutboundMessage::AuthorizationDenied(AuthorizationDeniedPayload {
                    reason: Some("removed from this session".into()),
                })),
            );
            return Err(Error::Denylisted(user));
        }

        let role = self
            .authorization
            .resolve(&user, &self.threat_model_id, &self.diagram_id)
            .await;
        let Some(role) = role else {
            sink.disconnect(
                DisconnectReason::AuthorizationDenied,
                Some(OutboundMessage::AuthorizationDenied(AuthorizationDeniedPayload {
                    reason: Some("no access to this diagram".into()),
                })),
            );
            return Err(Error::AuthorizationDenied(user));
        };

        let now = Utc::now();
        let mut record = ParticipantRecord::new(user.clone(), role, now);
        if self.host.is_none() && role.can_mutate() {
            record.is_host = true;
            self.host = Some(user.clone());
        }
        self.participants.insert(user.clone(), record);
        self.sinks.insert(user.clone(), sink);
        self.last_activity_at = now;

        if self.phase == Phase::Forming {
            self.phase = Phase::Active;
        }

        info!(diagram_id = %self.diagram_id, %user, %role, "participant joined");
        self.broadcast_all(
            OutboundMessage::ParticipantJoined(ParticipantJoinedPayload { user: user.clone() }),
            Some(user),
        );
        self.broadcast_participants_update();
        Ok(())
    }

    async fn handle_leave(&mut self, user: UserId) {
        if !self.participants.contains_key(&user) {
            return;
        }
        self.remove_participant_from_roster(&user);
        info!(diagram_id = %self.diagram_id, %user, "participant left");
        self.broadcast_all(
            OutboundMessage::ParticipantLeft(ParticipantLeftPayload { user: user.clone() }),
            Some(user),
        );
        self.broadcast_participants_update();

        if self.participants.is_empty() {
            self.begin_draining("last participant left");
        } else if self.host.is_none() {
            self.begin_draining("no writer remains to hold host");
        }
    }

    /// Remove `user` from every roster structure, migrating the host (by
    /// earliest `joined_at`, lexicographic `UserId` tie-break per spec.md
    /// §4.3) and clearing the presenter designation if either belonged to
    /// them. Does not broadcast or decide on draining — callers do that.
    fn remove_participant_from_roster(&mut self, user: &UserId) {
        self.participants.remove(user);
        self.sinks.remove(user);
        self.slow_consumer_events.remove(user);
        self.undo_stacks.remove(user);
        self.redo_stacks.remove(user);

        if self.host.as_ref() == Some(user) {
            self.host = None;
            self.reassign_host();
        }

        if self.presenter.as_ref() == Some(user) {
            self.presenter = None;
            self.broadcast_all(
                OutboundMessage::CurrentPresenter(CurrentPresenterPayload { presenter: None }),
                None,
            );
        }
    }

    /// Pick a new host from current participants (earliest `joined_at`,
    /// lexicographic `UserId` tie-break per spec.md §4.3). Assumes
    /// `self.host` has already been cleared by the caller; a no-op if no
    /// participant currently holds role >= writer.
    fn reassign_host(&mut self) {
        let mut candidates: Vec<(DateTime<Utc>, UserId)> = self
            .participants
            .values()
            .filter(|p| p.permission_from_authorizer.can_mutate())
            .map(|p| (p.joined_at, p.user_id.clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
        if let Some((_, new_host)) = candidates.into_iter().next() {
            if let Some(rec) = self.participants.get_mut(&new_host) {
                rec.is_host = true;
            }
            self.host = Some(new_host);
        }
    }

    fn begin_draining(&mut self, reason: &str) {
        if matches!(self.phase, Phase::Draining | Phase::Terminated) {
            return;
        }
        info!(diagram_id = %self.diagram_id, reason, "session draining");
        self.phase = Phase::Draining;
    }

    async fn finish_draining(&mut self) {
        let deadline = self.limits.end_session_save_deadline;
        if let Err(err) = self
            .persistence
            .save_on_end(&self.threat_model_id, &self.diagram, deadline)
            .await
        {
            error!(diagram_id = %self.diagram_id, error = %err, "save-on-end failed");
            self.broadcast_all(
                OutboundMessage::Error(ErrorPayload {
                    code: ErrorKind::Persistence.code().to_string(),
                    message: "unsaved_changes".into(),
                    fatal: false,
                }),
                None,
            );
        }

        let duration = Utc::now().signed_duration_since(self.created_at);
        info!(diagram_id = %self.diagram_id, duration_secs = duration.num_seconds(), "session ended");

        let users: Vec<UserId> = self.sinks.keys().cloned().collect();
        for user in users {
            if let Some(sink) = self.sinks.get(&user) {
                sink.disconnect(
                    DisconnectReason::SessionEnded,
                    Some(OutboundMessage::SessionEnded(SessionEndedPayload { reason: None })),
                );
            }
        }
        self.participants.clear();
        self.sinks.clear();
        self.phase = Phase::Terminated;
    }

    // -- inbound message dispatch ---------------------------------------

    async fn handle_inbound(&mut self, user: UserId, message: InboundMessage) {
        let Some(participant) = self.participants.get(&user).cloned() else {
            warn!(%user, "message from a user with no active participant record, dropping");
            return;
        };

        let now = Utc::now();
        self.last_activity_at = now;
        if let Some(p) = self.participants.get_mut(&user) {
            p.last_activity = now;
        }

        let targets_self =
            matches!(&message, InboundMessage::RemoveParticipant(p) if p.target == user);
        let ctx = SenderContext {
            role: participant.permission_from_authorizer,
            is_host: self.host.as_ref() == Some(&user),
            is_presenter: self.presenter.as_ref() == Some(&user),
            phase: self.phase,
            targets_self,
        };

        match authority::decide(&message, ctx) {
            Decision::RejectAuthorization => {
                self.send_to(
                    &user,
                    OutboundMessage::AuthorizationDenied(AuthorizationDeniedPayload { reason: None }),
                    None,
                );
            }
            Decision::RejectState(reason) => {
                self.send_to(
                    &user,
                    OutboundMessage::Error(ErrorPayload {
                        code: ErrorKind::Validation.code().to_string(),
                        message: reason.to_string(),
                        fatal: false,
                    }),
                    None,
                );
            }
            Decision::PresenterDenied => {
                self.send_to(
                    &user,
                    OutboundMessage::PresenterDenied(PresenterDeniedPayload { reason: None }),
                    None,
                );
            }
            Decision::DeliverToHostOnly => {
                if let Some(host) = self.host.clone() {
                    self.send_to(
                        &host,
                        OutboundMessage::PresenterRequested(PresenterRequestedPayload { from: user.clone() }),
                        Some(user),
                    );
                }
            }
            Decision::Accept => self.apply_accepted(user, message).await,
        }
    }

    async fn apply_accepted(&mut self, user: UserId, message: InboundMessage) {
        match message {
            InboundMessage::DiagramOperation(payload) => self.handle_diagram_operation(user, payload).await,
            InboundMessage::PresenterCursor(payload) => {
                self.broadcast_except(&user, OutboundMessage::PresenterCursor(payload), Some(user.clone()));
            }
            InboundMessage::PresenterSelection(payload) => {
                self.broadcast_except(&user, OutboundMessage::PresenterSelection(payload), Some(user.clone()));
            }
            InboundMessage::ChangePresenter(payload) => self.handle_change_presenter(user, payload).await,
            InboundMessage::RemoveParticipant(payload) => self.handle_remove_participant(payload).await,
            InboundMessage::UndoRequest => self.handle_undo(user).await,
            InboundMessage::RedoRequest => self.handle_redo(user).await,
            InboundMessage::ResyncRequest => self.handle_resync(user).await,
            InboundMessage::EndSession => self.begin_draining("end_session issued by host"),
            InboundMessage::PresenterRequest => {
                warn!("presenter_request reached apply_accepted; AuthorityPolicy should have intercepted it");
            }
        }
    }

    async fn handle_diagram_operation(&mut self, user: UserId, payload: DiagramOperationPayload) {
        let now = Utc::now();
        let result = operation_applier::apply(
            &self.diagram,
            payload.operation_id,
            user.clone(),
            Some(payload.update_vector),
            payload.cell_patches,
            self.limits.max_cells,
            now,
        );
        match result {
            Ok(ApplyOutcome { diagram, record }) => {
                self.diagram = diagram;
                self.persistence.record_applied_operation();
                self.undo_stacks.entry(user.clone()).or_default().push(record.clone());
                self.redo_stacks.remove(&user);
                self.broadcast_except(
                    &user,
                    OutboundMessage::HistoryOperation(HistoryOperationPayload {
                        operation_id: record.op_id,
                        update_vector: record.applied_update_vector,
                        cell_patches: record.cell_patches,
                        origin_user: record.origin_user_id,
                        kind: HistoryKind::Apply,
                    }),
                    Some(user),
                );
                if self.persistence.threshold_crossed() {
                    self.maybe_scheduled_save().await;
                }
            }
            Err(ApplyError::StateConflict {
                authoritative_update_vector,
            }) => {
                self.send_to(
                    &user,
                    OutboundMessage::StateCorrection(StateCorrectionPayload {
                        diagram: self.diagram.clone(),
                        update_vector: authoritative_update_vector,
                        reason: StateCorrectionReason::StaleOperation,
                    }),
                    None,
                );
            }
            Err(ApplyError::Validation(msg)) => {
                self.send_to(
                    &user,
                    OutboundMessage::Error(ErrorPayload {
                        code: ErrorKind::Validation.code().to_string(),
                        message: msg,
                        fatal: false,
                    }),
                    None,
                );
            }
        }
    }

    async fn handle_change_presenter(&mut self, host: UserId, payload: ChangePresenterPayload) {
        let target = payload.user;
        let Some(target_record) = self.participants.get(&target) else {
            self.send_to(
                &host,
                OutboundMessage::Error(ErrorPayload {
                    code: ErrorKind::Validation.code().to_string(),
                    message: format!("{target} is not a participant"),
                    fatal: false,
                }),
                None,
            );
            return;
        };
        if !target_record.permission_from_authorizer.can_mutate() {
            self.send_to(
                &host,
                OutboundMessage::Error(ErrorPayload {
                    code: ErrorKind::Validation.code().to_string(),
                    message: format!("{target} does not hold a presenter-eligible role"),
                    fatal: false,
                }),
                None,
            );
            return;
        }

        if self.presenter.as_ref() == Some(&target) {
            // Self-target is a no-op but still re-broadcasts, so a client
            // that missed the original announcement resyncs.
            self.broadcast_all(
                OutboundMessage::CurrentPresenter(CurrentPresenterPayload {
                    presenter: Some(target),
                }),
                None,
            );
            return;
        }

        if let Some(previous) = self.presenter.take() {
            if let Some(rec) = self.participants.get_mut(&previous) {
                rec.is_presenter = false;
            }
        }
        if let Some(rec) = self.participants.get_mut(&target) {
            rec.is_presenter = true;
            rec.presenter_requested_at = None;
        }
        self.presenter = Some(target.clone());
        self.broadcast_all(
            OutboundMessage::CurrentPresenter(CurrentPresenterPayload {
                presenter: Some(target),
            }),
            None,
        );
    }

    async fn handle_remove_participant(&mut self, payload: RemoveParticipantPayload) {
        let target = payload.target;
        if !self.participants.contains_key(&target) {
            return;
        }
        self.denylist.insert(target.clone());
        if let Some(sink) = self.sinks.get(&target) {
            sink.disconnect(
                DisconnectReason::Kicked,
                Some(OutboundMessage::AuthorizationDenied(AuthorizationDeniedPayload {
                    reason: Some("removed by host".into()),
                })),
            );
        }
        self.remove_participant_from_roster(&target);
        self.broadcast_all(
            OutboundMessage::ParticipantLeft(ParticipantLeftPayload { user: target.clone() }),
            Some(target),
        );
        self.broadcast_participants_update();
    }

    async fn handle_undo(&mut self, user: UserId) {
        let Some(original) = self.undo_stacks.get_mut(&user).and_then(|s| s.pop()) else {
            self.send_to(
                &user,
                OutboundMessage::Error(ErrorPayload {
                    code: ErrorKind::Validation.code().to_string(),
                    message: "nothing to undo".into(),
                    fatal: false,
                }),
                None,
            );
            return;
        };
        let inverse_patches = original.inverse_patches();
        let undo_op_id = OperationId::from(format!("{}-undo", original.op_id));
        let now = Utc::now();
        match operation_applier::apply(
            &self.diagram,
            undo_op_id,
            user.clone(),
            None,
            inverse_patches,
            self.limits.max_cells,
            now,
        ) {
            Ok(ApplyOutcome { diagram, record }) => {
                self.diagram = diagram;
                self.persistence.record_applied_operation();
                self.redo_stacks.entry(user.clone()).or_default().push(record.clone());
                self.broadcast_except(
                    &user,
                    OutboundMessage::HistoryOperation(HistoryOperationPayload {
                        operation_id: record.op_id,
                        update_vector: record.applied_update_vector,
                        cell_patches: record.cell_patches,
                        origin_user: record.origin_user_id,
                        kind: HistoryKind::Undo,
                    }),
                    Some(user),
                );
            }
            Err(ApplyError::Validation(msg)) => {
                self.undo_stacks.entry(user.clone()).or_default().push(original);
                self.send_to(
                    &user,
                    OutboundMessage::Error(ErrorPayload {
                        code: ErrorKind::Validation.code().to_string(),
                        message: msg,
                        fatal: false,
                    }),
                    None,
                );
            }
            Err(ApplyError::StateConflict {
                authoritative_update_vector,
            }) => {
                self.undo_stacks.entry(user.clone()).or_default().push(original);
                self.send_to(
                    &user,
                    OutboundMessage::StateCorrection(StateCorrectionPayload {
                        diagram: self.diagram.clone(),
                        update_vector: authoritative_update_vector,
                        reason: StateCorrectionReason::StaleOperation,
                    }),
                    None,
                );
            }
        }
    }

    async fn handle_redo(&mut self, user: UserId) {
        let Some(undone) = self.redo_stacks.get_mut(&user).and_then(|s| s.pop()) else {
            self.send_to(
                &user,
                OutboundMessage::Error(ErrorPayload {
                    code: ErrorKind::Validation.code().to_string(),
                    message: "nothing to redo".into(),
                    fatal: false,
                }),
                None,
            );
            return;
        };
        let forward_patches = undone.inverse_patches();
        let redo_op_id = OperationId::from(format!("{}-redo", undone.op_id));
        let now = Utc::now();
        match operation_applier::apply(
            &self.diagram,
            redo_op_id,
            user.clone(),
            None,
            forward_patches,
            self.limits.max_cells,
            now,
        ) {
            Ok(ApplyOutcome { diagram, record }) => {
                self.diagram = diagram;
                self.persistence.record_applied_operation();
                self.undo_stacks.entry(user.clone()).or_default().push(record.clone());
                self.broadcast_except(
                    &user,
                    OutboundMessage::HistoryOperation(HistoryOperationPayload {
                        operation_id: record.op_id,
                        update_vector: record.applied_update_vector,
                        cell_patches: record.cell_patches,
                        origin_user: record.origin_user_id,
                        kind: HistoryKind::Redo,
                    }),
                    Some(user),
                );
            }
            Err(ApplyError::Validation(msg)) => {
                self.redo_stacks.entry(user.clone()).or_default().push(undone);
                self.send_to(
                    &user,
                    OutboundMessage::Error(ErrorPayload {
                        code: ErrorKind::Validation.code().to_string(),
                        message: msg,
                        fatal: false,
                    }),
                    None,
                );
            }
            Err(ApplyError::StateConflict {
                authoritative_update_vector,
            }) => {
                self.redo_stacks.entry(user.clone()).or_default().push(undone);
                self.send_to(
                    &user,
                    OutboundMessage::StateCorrection(StateCorrectionPayload {
                        diagram: self.diagram.clone(),
                        update_vector: authoritative_update_vector,
                        reason: StateCorrectionReason::StaleOperation,
                    }),
                    None,
                );
            }
        }
    }

    async fn handle_resync(&mut self, user: UserId) {
        let participants = self.participant_summaries();
        self.send_to(
            &user,
            OutboundMessage::ResyncResponse(ResyncResponsePayload {
                diagram: self.diagram.clone(),
                update_vector: self.diagram.update_vector,
                participants,
                host: self.host.clone(),
                presenter: self.presenter.clone(),
            }),
            None,
        );
    }

    // -- periodic ticks ---------------------------------------------------

    async fn maybe_scheduled_save(&mut self) {
        if self.persistence.save_in_flight() {
            return;
        }
        match self.persistence.save(&self.threat_model_id, &self.diagram).await {
            SaveOutcome::Saved { .. } | SaveOutcome::Failed => {}
            SaveOutcome::Conflict(conflict) => self.reconcile_conflict(conflict).await,
        }
    }

    async fn reconcile_conflict(&mut self, conflict: CasConflict) {
        warn!(diagram_id = %self.diagram_id, "adopting remote diagram after a lost CAS race");
        self.diagram = conflict.remote.clone();
        self.persistence.adopt_remote(&conflict.remote);
        // Pending per-user history may no longer reproduce cleanly against
        // the adopted remote; rather than guess, drop it and let clients
        // resync from the broadcast state_correction below.
        self.undo_stacks.clear();
        self.redo_stacks.clear();
        self.broadcast_all(
            OutboundMessage::StateCorrection(StateCorrectionPayload {
                diagram: self.diagram.clone(),
                update_vector: self.diagram.update_vector,
                reason: StateCorrectionReason::ExternalWrite,
            }),
            None,
        );
    }

    async fn refresh_authorization_and_sweep_ttl(&mut self) {
        let now = Utc::now();
        let users: Vec<UserId> = self.participants.keys().cloned().collect();
        for user in users {
            let Some(participant) = self.participants.get(&user) else {
                continue;
            };
            let idle_for = now
                .signed_duration_since(participant.last_activity)
                .to_std()
                .unwrap_or_default();
            if idle_for > self.limits.participant_ttl {
                if let Some(sink) = self.sinks.get(&user) {
                    sink.disconnect(
                        DisconnectReason::ParticipantTtlExpired,
                        Some(OutboundMessage::SessionEnded(SessionEndedPayload {
                            reason: Some("inactive too long".into()),
                        })),
                    );
                }
                self.remove_participant_from_roster(&user);
                self.broadcast_all(
                    OutboundMessage::ParticipantLeft(ParticipantLeftPayload { user: user.clone() }),
                    Some(user),
                );
                self.broadcast_participants_update();
                continue;
            }

            self.recheck_authorization_for(&user).await;
        }

        if self.phase == Phase::Active && self.participants.is_empty() {
            self.begin_draining("all participants timed out");
        } else if self.phase == Phase::Active && self.host.is_none() {
            self.begin_draining("no host remains after the refresh sweep");
        }
    }

    /// Re-query `AuthorizationResolver` for a single participant and react,
    /// the unit of work both the periodic sweep and an external push
    /// signal (spec.md §9, [`Command::AuthorizationPing`]) share. A no-op
    /// if `user` is not currently a participant.
    async fn recheck_authorization_for(&mut self, user: &UserId) {
        if !self.participants.contains_key(user) {
            return;
        }
        let outcome = self
            .authorization
            .resolve(user, &self.threat_model_id, &self.diagram_id)
            .await;
        match outcome {
            None => {
                if let Some(sink) = self.sinks.get(user) {
                    sink.disconnect(
                        DisconnectReason::AuthorizationDenied,
                        Some(OutboundMessage::AuthorizationDenied(AuthorizationDeniedPayload {
                            reason: Some("access revoked".into()),
                        })),
                    );
                }
                self.remove_participant_from_roster(user);
                self.broadcast_all(
                    OutboundMessage::ParticipantLeft(ParticipantLeftPayload { user: user.clone() }),
                    Some(user.clone()),
                );
                self.broadcast_participants_update();
                if self.phase == Phase::Active && self.participants.is_empty() {
                    self.begin_draining("all participants revoked");
                } else if self.phase == Phase::Active && self.host.is_none() {
                    self.begin_draining("no host remains after an authorization check");
                }
            }
            Some(role) => {
                let mut role_changed = false;
                if let Some(rec) = self.participants.get_mut(user) {
                    if rec.permission_from_authorizer != role {
                        info!(%user, old = %rec.permission_from_authorizer, new = %role, "authorization changed");
                        rec.permission_from_authorizer = role;
                        role_changed = true;
                    }
                }

                // A demoted host can no longer hold host (spec.md Invariant
                // 1): strip it and migrate the same way a departing host
                // does, since AuthorityPolicy gates host-only messages on
                // `is_host` alone and would otherwise keep granting them.
                if role_changed && !role.can_mutate() && self.host.as_ref() == Some(user) {
                    if let Some(rec) = self.participants.get_mut(user) {
                        rec.is_host = false;
                    }
                    self.host = None;
                    self.reassign_host();
                    self.broadcast_participants_update();
                    if self.phase == Phase::Active && self.host.is_none() {
                        self.begin_draining("demoted host and no writer remains to replace them");
                    }
                }
            }
        }
    }

    fn check_idle_timeout(&mut self) {
        if self.phase != Phase::Active {
            return;
        }
        let idle_for = Utc::now()
            .signed_duration_since(self.last_activity_at)
            .to_std()
            .unwrap_or_default();
        if idle_for > self.limits.idle_timeout {
            self.begin_draining("whole-session idle timeout");
        }
    }

    // -- outbound helpers ---------------------------------------------------

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            diagram_id: self.diagram_id.clone(),
            phase: self.phase,
            host: self.host.clone(),
            presenter: self.presenter.clone(),
            participant_count: self.participants.len(),
            update_vector: self.diagram.update_vector,
            created_at: self.created_at,
        }
    }

    fn participant_summaries(&self) -> Vec<ParticipantSummary> {
        self.participants
            .values()
            .map(|p| ParticipantSummary {
                user: p.user_id.clone(),
                role: p.permission_from_authorizer,
                is_host: p.is_host,
                is_presenter: p.is_presenter,
                joined_at: p.joined_at,
                last_activity: p.last_activity,
            })
            .collect()
    }

    fn broadcast_participants_update(&mut self) {
        let participants = self.participant_summaries();
        self.broadcast_all(
            OutboundMessage::ParticipantsUpdate(ParticipantsUpdatePayload { participants }),
            None,
        );
    }

    fn send_to(&mut self, user: &UserId, message: OutboundMessage, envelope_user: Option<UserId>) {
        let Some(sink) = self.sinks.get(user).map(Arc::clone) else {
            return;
        };
        if let Err(SendError::QueueFull) = sink.try_send(envelope_user, message) {
            self.note_slow_consumer(user);
        }
    }

    fn broadcast_all(&mut self, message: OutboundMessage, envelope_user: Option<UserId>) {
        self.broadcast_filtered(message, envelope_user, |_| true);
    }

    fn broadcast_except(&mut self, exclude: &UserId, message: OutboundMessage, envelope_user: Option<UserId>) {
        let exclude = exclude.clone();
        self.broadcast_filtered(message, envelope_user, move |u| *u != exclude);
    }

    fn broadcast_filtered(
        &mut self,
        message: OutboundMessage,
        envelope_user: Option<UserId>,
        keep: impl Fn(&UserId) -> bool,
    ) {
        let targets: Vec<(UserId, Arc<dyn ParticipantSink>)> = self
            .sinks
            .iter()
            .filter(|(u, _)| keep(u))
            .map(|(u, s)| (u.clone(), Arc::clone(s)))
            .collect();
        let mut slow = Vec::new();
        for (user, sink) in targets {
            if let Err(SendError::QueueFull) = sink.try_send(envelope_user.clone(), message.clone()) {
                slow.push(user);
            }
        }
        for user in slow {
            self.note_slow_consumer(&user);
        }
    }

    fn note_slow_consumer(&mut self, user: &UserId) {
        let now = Utc::now();
        let window = self.limits.slow_consumer_window;
        let events = self.slow_consumer_events.entry(user.clone()).or_default();
        events.push(now);
        events.retain(|t| {
            now.signed_duration_since(*t)
                .to_std()
                .map(|d| d <= window)
                .unwrap_or(false)
        });
        if events.len() as u32 >= self.limits.slow_consumer_threshold {
            warn!(%user, "slow consumer threshold exceeded, disconnecting");
            if let Some(sink) = self.sinks.get(user) {
                sink.disconnect(
                    DisconnectReason::SlowConsumer,
                    Some(OutboundMessage::Error(ErrorPayload {
                        code: ErrorKind::SlowConsumer.code().to_string(),
                        message: "outbound queue overflowed repeatedly".into(),
                        fatal: true,
                    })),
                );
            }
            self.remove_participant_from_roster(user);
        }
    }
}

async fn run(mut state: SessionState, mut rx: mpsc::Receiver<Command>, terminated: mpsc::UnboundedSender<DiagramId>) {
    let mut save_tick = tokio::time::interval(state.limits.save_interval);
    save_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh_tick = tokio::time::interval(state.limits.auth_refresh_interval);
    refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(diagram_id = %state.diagram_id, "session actor starting");

    loop {
        if state.phase == Phase::Terminated {
            break;
        }

        tokio::select! {
            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(Command::Join { user, sink, reply }) => {
                        let result = state.handle_join(user, sink).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Inbound { user, message }) => state.handle_inbound(user, message).await,
                    Some(Command::Leave { user }) => state.handle_leave(user).await,
                    Some(Command::AuthorizationPing { user }) => state.recheck_authorization_for(&user).await,
                    Some(Command::CheckDenylist { user, reply }) => {
                        let _ = reply.send(state.denylist.contains(&user));
                    }
                    Some(Command::Snapshot { reply }) => {
                        let _ = reply.send(state.snapshot());
                    }
                    Some(Command::ForceEnd) => state.begin_draining("end-session requested via REST control plane"),
                    None => state.begin_draining("all session handles dropped"),
                }
            }
            _ = save_tick.tick() => state.maybe_scheduled_save().await,
            _ = refresh_tick.tick() => state.refresh_authorization_and_sweep_ttl().await,
        }

        state.check_idle_timeout();
        if state.phase == Phase::Draining {
            state.finish_draining().await;
        }
    }

    let _ = terminated.send(state.diagram_id.clone());
    info!(diagram_id = %state.diagram_id, "session actor stopped");
}
