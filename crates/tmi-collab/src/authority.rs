//! AuthorityPolicy (spec.md §4.6): the decision table keyed by message type,
//! sender role, sender host/presenter flags, and session phase. Pure and
//! side-effect free so the table itself can be unit-tested exhaustively
//! against the spec's scenarios without spinning up a `Session`.

use tmi_protocol::Role;
use tmi_wire::InboundMessage;

use crate::session::Phase;

/// What the `Session` should do with an incoming message, once
/// `AuthorityPolicy` has looked at who sent it and in what state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Hand the message to the normal per-type handler.
    Accept,
    /// `presenter_request`: not auto-granted, delivered only to the host.
    DeliverToHostOnly,
    /// Role-based rejection: `authorization_denied` to the sender only.
    RejectAuthorization,
    /// State- or rule-based rejection: `error` to the sender only, with the
    /// given human-readable reason. Session state is unchanged.
    RejectState(&'static str),
    /// Sender is not the current presenter: `presenter_denied` to the
    /// sender only.
    PresenterDenied,
}

/// Everything `AuthorityPolicy` needs to know about the sender and the
/// session to decide, without touching the rest of `Session`'s state.
#[derive(Debug, Clone, Copy)]
pub struct SenderContext {
    pub role: Role,
    pub is_host: bool,
    pub is_presenter: bool,
    pub phase: Phase,
    /// Only meaningful for `remove_participant`: true if the target named
    /// in the payload is the sender themselves.
    pub targets_self: bool,
}

pub fn decide(message: &InboundMessage, ctx: SenderContext) -> Decision {
    use InboundMessage::*;

    if ctx.phase == Phase::Draining || ctx.phase == Phase::Terminated {
        return match message {
            ResyncRequest => Decision::Accept,
            DiagramOperation(_) => Decision::RejectState("session is ending"),
            _ => Decision::RejectState("session is ending"),
        };
    }

    match message {
        DiagramOperation(_) => {
            if ctx.role.can_mutate() {
                Decision::Accept
            } else {
                Decision::RejectAuthorization
            }
        }
        PresenterRequest => {
            if ctx.role.can_mutate() {
                Decision::DeliverToHostOnly
            } else {
                Decision::RejectAuthorization
            }
        }
        PresenterCursor(_) | PresenterSelection(_) => {
            if !ctx.role.can_mutate() {
                Decision::RejectAuthorization
            } else if ctx.is_presenter {
                Decision::Accept
            } else {
                Decision::PresenterDenied
            }
        }
        ChangePresenter(_) => {
            if ctx.is_host {
                Decision::Accept
            } else {
                Decision::RejectAuthorization
            }
        }
        RemoveParticipant(_) => {
            if !ctx.is_host {
                Decision::RejectAuthorization
            } else if ctx.targets_self {
                Decision::RejectState("host cannot remove self")
            } else {
                Decision::Accept
            }
        }
        UndoRequest | RedoRequest => {
            if ctx.role.can_mutate() {
                Decision::Accept
            } else {
                Decision::RejectAuthorization
            }
        }
        ResyncRequest => Decision::Accept,
        EndSession => {
            if ctx.is_host {
                Decision::Accept
            } else {
                Decision::RejectAuthorization
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmi_wire::ChangePresenterPayload;
    use tmi_wire::RemoveParticipantPayload;

    fn ctx(role: Role, is_host: bool, is_presenter: bool) -> SenderContext {
        SenderContext {
            role,
            is_host,
            is_presenter,
            phase: Phase::Active,
            targets_self: false,
        }
    }

    #[test]
    fn reader_cannot_mutate() {
        let msg = InboundMessage::DiagramOperation(tmi_wire::DiagramOperationPayload {
            operation_id: "op1".into(),
            update_vector: 0,
            cell_patches: vec![],
        });
        assert_eq!(
            decide(&msg, ctx(Role::Reader, false, false)),
            Decision::RejectAuthorization
        );
    }

    #[test]
    fn presenter_request_goes_to_host_only() {
        assert_eq!(
            decide(&InboundMessage::PresenterRequest, ctx(Role::Writer, false, false)),
            Decision::DeliverToHostOnly
        );
    }

    #[test]
    fn non_presenter_writer_cursor_is_denied() {
        let msg = InboundMessage::PresenterCursor(tmi_wire::PresenterCursorPayload {
            x: 1.0,
            y: 2.0,
        });
        assert_eq!(
            decide(&msg, ctx(Role::Writer, false, false)),
            Decision::PresenterDenied
        );
    }

    #[test]
    fn only_host_changes_presenter() {
        let msg = InboundMessage::ChangePresenter(ChangePresenterPayload {
            user: "bob".into(),
        });
        assert_eq!(
            decide(&msg, ctx(Role::Writer, false, false)),
            Decision::RejectAuthorization
        );
        assert_eq!(
            decide(&msg, ctx(Role::Owner, true, false)),
            Decision::Accept
        );
    }

    #[test]
    fn host_cannot_remove_self() {
        let msg = InboundMessage::RemoveParticipant(RemoveParticipantPayload {
            target: "alice".into(),
        });
        let mut self_ctx = ctx(Role::Owner, true, false);
        self_ctx.targets_self = true;
        assert_eq!(decide(&msg, self_ctx), Decision::RejectState("host cannot remove self"));
    }

    #[test]
    fn diagram_operation_rejected_while_draining() {
        let msg = InboundMessage::DiagramOperation(tmi_wire::DiagramOperationPayload {
            operation_id: "op1".into(),
            update_vector: 0,
            cell_patches: vec![],
        });
        let mut draining_ctx = ctx(Role::Owner, true, false);
        draining_ctx.phase = Phase::Draining;
        assert_eq!(
            decide(&msg, draining_ctx),
            Decision::RejectState("session is ending")
        );
    }

    #[test]
    fn resync_always_answered_even_while_draining() {
        let mut draining_ctx = ctx(Role::Reader, false, false);
        draining_ctx.phase = Phase::Draining;
        assert_eq!(
            decide(&InboundMessage::ResyncRequest, draining_ctx),
            Decision::Accept
        );
    }
}
