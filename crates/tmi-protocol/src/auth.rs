use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::UserId;
use crate::role::Role;

/// Result of a re-check against the authorization resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Role(Role),
    Revoked,
}

/// A change in a participant's authorization, detected by a periodic
/// refresh or an external push signal (spec.md §3, §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationChangeEvent {
    pub subject: UserId,
    pub outcome: AuthorizationOutcome,
    pub effective_at: DateTime<Utc>,
}
