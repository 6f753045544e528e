use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::UserId;
use crate::role::Role;

/// A session's live view of one participant (spec.md §3).
///
/// `role` is the role snapshot taken at join time; `permission_from_authorizer`
/// is refreshed periodically (spec.md §4.3) and is the value actually
/// consulted by `AuthorityPolicy` for every message after the initial join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub user_id: UserId,
    pub role: Role,
    pub permission_from_authorizer: Role,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_host: bool,
    pub is_presenter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presenter_requested_at: Option<DateTime<Utc>>,
}

impl ParticipantRecord {
    pub fn new(user_id: UserId, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            permission_from_authorizer: role,
            joined_at: now,
            last_activity: now,
            is_host: false,
            is_presenter: false,
            presenter_requested_at: None,
        }
    }
}
