use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use tmi_protocol::CellId;
use tmi_protocol::CellPatch;
use tmi_protocol::Diagram;
use tmi_protocol::OperationId;
use tmi_protocol::Role;
use tmi_protocol::UserId;

// ---------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramOperationPayload {
    pub operation_id: OperationId,
    pub update_vector: u64,
    pub cell_patches: Vec<CellPatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenterCursorPayload {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenterSelectionPayload {
    pub cell_ids: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePresenterPayload {
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveParticipantPayload {
    pub target: UserId,
}

// ---------------------------------------------------------------------
// Shared / outbound payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub user: UserId,
    pub role: Role,
    pub is_host: bool,
    pub is_presenter: bool,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantsUpdatePayload {
    pub participants: Vec<ParticipantSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPresenterPayload {
    pub presenter: Option<UserId>,
}

/// Notification delivered to the host only when a writer calls
/// `presenter_request` (spec.md §4.3); the host decides whether to grant it
/// via `change_presenter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenterRequestedPayload {
    pub from: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCorrectionReason {
    StaleOperation,
    ExternalWrite,
    Resync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCorrectionPayload {
    pub diagram: Diagram,
    pub update_vector: u64,
    pub reason: StateCorrectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncResponsePayload {
    pub diagram: Diagram,
    pub update_vector: u64,
    pub participants: Vec<ParticipantSummary>,
    pub host: Option<UserId>,
    pub presenter: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Undo,
    Redo,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryOperationPayload {
    pub operation_id: OperationId,
    pub update_vector: u64,
    pub cell_patches: Vec<CellPatch>,
    pub origin_user: UserId,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantJoinedPayload {
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantLeftPayload {
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenterDeniedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDeniedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub fatal: bool,
}
