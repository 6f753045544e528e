//! WireCodec (spec.md §4.1): parsing, structural validation, and
//! serialization of the JSON envelope exchanged over a diagram's WebSocket.
//!
//! Two typed enums dispatch on `message_type` — [`InboundMessage`] for what a
//! client may send, [`OutboundMessage`] for what the server may send — so
//! every other component matches on a closed Rust enum instead of re-parsing
//! JSON. Structural shape (required fields, field types) is enforced by
//! `serde` at the payload-struct boundary; anything coarser (size, unknown
//! `message_type`) is checked explicitly in [`envelope::RawEnvelope`].

mod envelope;
mod error;
mod inbound;
mod outbound;
mod payloads;

pub use envelope::RawEnvelope;
pub use error::CodecError;
pub use error::Severity;
pub use inbound::InboundMessage;
pub use outbound::OutboundMessage;
pub use payloads::AuthorizationDeniedPayload;
pub use payloads::ChangePresenterPayload;
pub use payloads::CurrentPresenterPayload;
pub use payloads::DiagramOperationPayload;
pub use payloads::ErrorPayload;
pub use payloads::HistoryKind;
pub use payloads::HistoryOperationPayload;
pub use payloads::ParticipantJoinedPayload;
pub use payloads::ParticipantLeftPayload;
pub use payloads::ParticipantSummary;
pub use payloads::ParticipantsUpdatePayload;
pub use payloads::PresenterCursorPayload;
pub use payloads::PresenterDeniedPayload;
pub use payloads::PresenterRequestedPayload;
pub use payloads::PresenterSelectionPayload;
pub use payloads::RemoveParticipantPayload;
pub use payloads::ResyncResponsePayload;
pub use payloads::SessionEndedPayload;
pub use payloads::StateCorrectionPayload;
pub use payloads::StateCorrectionReason;
