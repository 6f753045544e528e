use serde_json::Value;

use tmi_protocol::UserId;

use crate::envelope::RawEnvelope;
use crate::error::CodecError;
use crate::payloads::AuthorizationDeniedPayload;
use crate::payloads::CurrentPresenterPayload;
use crate::payloads::ErrorPayload;
use crate::payloads::HistoryOperationPayload;
use crate::payloads::ParticipantJoinedPayload;
use crate::payloads::ParticipantLeftPayload;
use crate::payloads::ParticipantsUpdatePayload;
use crate::payloads::PresenterCursorPayload;
use crate::payloads::PresenterDeniedPayload;
use crate::payloads::PresenterRequestedPayload;
use crate::payloads::PresenterSelectionPayload;
use crate::payloads::ResyncResponsePayload;
use crate::payloads::SessionEndedPayload;
use crate::payloads::StateCorrectionPayload;

/// Every message the server may send to a client (spec.md §4.1's outbound list).
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    ParticipantsUpdate(ParticipantsUpdatePayload),
    CurrentPresenter(CurrentPresenterPayload),
    PresenterRequested(PresenterRequestedPayload),
    PresenterCursor(PresenterCursorPayload),
    PresenterSelection(PresenterSelectionPayload),
    PresenterDenied(PresenterDeniedPayload),
    AuthorizationDenied(AuthorizationDeniedPayload),
    StateCorrection(StateCorrectionPayload),
    ResyncResponse(ResyncResponsePayload),
    HistoryOperation(HistoryOperationPayload),
    ParticipantJoined(ParticipantJoinedPayload),
    ParticipantLeft(ParticipantLeftPayload),
    SessionEnded(SessionEndedPayload),
    Error(ErrorPayload),
}

impl OutboundMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ParticipantsUpdate(_) => "participants_update",
            Self::CurrentPresenter(_) => "current_presenter",
            Self::PresenterRequested(_) => "presenter_request",
            Self::PresenterCursor(_) => "presenter_cursor",
            Self::PresenterSelection(_) => "presenter_selection",
            Self::PresenterDenied(_) => "presenter_denied",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::StateCorrection(_) => "state_correction",
            Self::ResyncResponse(_) => "resync_response",
            Self::HistoryOperation(_) => "history_operation",
            Self::ParticipantJoined(_) => "participant_joined",
            Self::ParticipantLeft(_) => "participant_left",
            Self::SessionEnded(_) => "session_ended",
            Self::Error(_) => "error",
        }
    }

    fn payload_value(&self) -> Result<Value, CodecError> {
        let to_value = |v| serde_json::to_value(v).map_err(CodecError::MalformedFraming);
        match self {
            Self::ParticipantsUpdate(p) => to_value(p),
            Self::CurrentPresenter(p) => to_value(p),
            Self::PresenterRequested(p) => to_value(p),
            Self::PresenterCursor(p) => to_value(p),
            Self::PresenterSelection(p) => to_value(p),
            Self::PresenterDenied(p) => to_value(p),
            Self::AuthorizationDenied(p) => to_value(p),
            Self::StateCorrection(p) => to_value(p),
            Self::ResyncResponse(p) => to_value(p),
            Self::HistoryOperation(p) => to_value(p),
            Self::ParticipantJoined(p) => to_value(p),
            Self::ParticipantLeft(p) => to_value(p),
            Self::SessionEnded(p) => to_value(p),
            Self::Error(p) => to_value(p),
        }
    }

    /// Serialize to the wire envelope, stamping `user` (when identity is
    /// relevant to this message type) and a fresh `timestamp` (spec.md §4.1).
    pub fn encode(&self, user: Option<UserId>) -> Result<Vec<u8>, CodecError> {
        let payload = self.payload_value()?;
        let envelope = RawEnvelope::build(self.message_type(), user, payload)?;
        envelope.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::CurrentPresenterPayload;

    #[test]
    fn encodes_with_timestamp_and_message_type() {
        let msg = OutboundMessage::CurrentPresenter(CurrentPresenterPayload {
            presenter: Some(UserId::from("alice")),
        });
        let bytes = msg.encode(None).expect("encode");
        let value: Value = serde_json::from_slice(&bytes).expect("parse");
        assert_eq!(value["message_type"], "current_presenter");
        assert_eq!(value["presenter"], "alice");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn stamps_authoritative_user_when_provided() {
        let msg = OutboundMessage::ParticipantJoined(ParticipantJoinedPayload {
            user: UserId::from("bob"),
        });
        let bytes = msg.encode(Some(UserId::from("bob"))).expect("encode");
        let value: Value = serde_json::from_slice(&bytes).expect("parse");
        assert_eq!(value["user"], "bob");
    }
}
