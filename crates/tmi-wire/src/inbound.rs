use crate::envelope::RawEnvelope;
use crate::error::CodecError;
use crate::payloads::ChangePresenterPayload;
use crate::payloads::DiagramOperationPayload;
use crate::payloads::PresenterCursorPayload;
use crate::payloads::PresenterSelectionPayload;
use crate::payloads::RemoveParticipantPayload;

/// Every message a client may legally send (spec.md §4.1's inbound list).
/// Identity (`user`) is never taken from the payload; see `RawEnvelope`.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    DiagramOperation(DiagramOperationPayload),
    PresenterRequest,
    PresenterCursor(PresenterCursorPayload),
    PresenterSelection(PresenterSelectionPayload),
    ChangePresenter(ChangePresenterPayload),
    RemoveParticipant(RemoveParticipantPayload),
    UndoRequest,
    RedoRequest,
    ResyncRequest,
    EndSession,
}

impl InboundMessage {
    pub fn decode(bytes: &[u8], byte_budget: usize) -> Result<Self, CodecError> {
        let raw = RawEnvelope::decode(bytes, byte_budget)?;
        Self::from_raw(&raw)
    }

    pub fn from_raw(raw: &RawEnvelope) -> Result<Self, CodecError> {
        match raw.message_type.as_str() {
            "diagram_operation" => Ok(Self::DiagramOperation(raw.payload()?)),
            "presenter_request" => Ok(Self::PresenterRequest),
            "presenter_cursor" => Ok(Self::PresenterCursor(raw.payload()?)),
            "presenter_selection" => Ok(Self::PresenterSelection(raw.payload()?)),
            "change_presenter" => Ok(Self::ChangePresenter(raw.payload()?)),
            "remove_participant" => Ok(Self::RemoveParticipant(raw.payload()?)),
            "undo_request" => Ok(Self::UndoRequest),
            "redo_request" => Ok(Self::RedoRequest),
            "resync_request" => Ok(Self::ResyncRequest),
            "end_session" => Ok(Self::EndSession),
            other => Err(CodecError::UnknownMessageType(other.to_string())),
        }
    }

    /// The `message_type` string this message was (or would be) tagged with.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::DiagramOperation(_) => "diagram_operation",
            Self::PresenterRequest => "presenter_request",
            Self::PresenterCursor(_) => "presenter_cursor",
            Self::PresenterSelection(_) => "presenter_selection",
            Self::ChangePresenter(_) => "change_presenter",
            Self::RemoveParticipant(_) => "remove_participant",
            Self::UndoRequest => "undo_request",
            Self::RedoRequest => "redo_request",
            Self::ResyncRequest => "resync_request",
            Self::EndSession => "end_session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_diagram_operation() {
        let json = br#"{
            "message_type": "diagram_operation",
            "operation_id": "op-1",
            "update_vector": 0,
            "cell_patches": []
        }"#;
        let msg = InboundMessage::decode(json, 1024).expect("decode");
        assert!(matches!(msg, InboundMessage::DiagramOperation(_)));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let json = br#"{"message_type": "from_the_future"}"#;
        let err = InboundMessage::decode(json, 1024).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType(_)));
        assert_eq!(err.severity(), crate::error::Severity::Recoverable);
    }

    #[test]
    fn rejects_oversize_payload() {
        let huge = vec![b'a'; 64];
        let err = InboundMessage::decode(&huge, 8).unwrap_err();
        assert!(matches!(err, CodecError::Oversize { .. }));
        assert_eq!(err.severity(), crate::error::Severity::ImmediatelyFatal);
    }

    #[test]
    fn rejects_missing_required_field() {
        let json = br#"{"message_type": "diagram_operation", "operation_id": "op-1"}"#;
        let err = InboundMessage::decode(json, 1024).unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayload { .. }));
    }

    #[test]
    fn ignores_client_supplied_user() {
        let json = br#"{"message_type": "resync_request", "user": "someone-else"}"#;
        let msg = InboundMessage::decode(json, 1024).expect("decode");
        assert_eq!(msg, InboundMessage::ResyncRequest);
    }

    #[test]
    fn round_trip_preserves_structural_equality() {
        let json = br#"{
            "message_type": "presenter_selection",
            "cell_ids": ["c1", "c2"]
        }"#;
        let decoded = InboundMessage::decode(json, 1024).expect("decode");
        let raw = RawEnvelope::decode(json, 1024).expect("decode raw");
        let re_decoded = InboundMessage::from_raw(&raw).expect("decode again");
        assert_eq!(decoded, re_decoded);
    }
}
