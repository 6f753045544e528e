use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Tunable knobs referenced throughout spec.md §4-§7. All defaults match the
/// values called out in the spec text; every field can be overridden by
/// `tmi_collab::Config`'s TOML file or environment overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// §4.2: outbound queue capacity per `ClientEndpoint`.
    pub outbound_queue_capacity: usize,
    /// §4.2: heartbeat ping interval.
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
    /// §4.2: consecutive missed pongs before disconnect.
    pub missed_pongs_limit: u32,
    /// §4.2/§4.3: consecutive full-queue events before an endpoint is slow.
    pub slow_consumer_threshold: u32,
    /// §4.2: window over which slow-consumer events are counted.
    #[serde(with = "duration_secs")]
    pub slow_consumer_window: Duration,
    /// §4.3: whole-session idle timeout.
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Per-participant idle timeout, distinct from the whole-session one
    /// (SPEC_FULL.md §C.1).
    #[serde(with = "duration_secs")]
    pub participant_ttl: Duration,
    /// §4.3: authorization re-check interval.
    #[serde(with = "duration_secs")]
    pub auth_refresh_interval: Duration,
    /// §4.7: scheduled-save interval.
    #[serde(with = "duration_secs")]
    pub save_interval: Duration,
    /// §4.7: pending-operation count that forces an out-of-cycle save.
    pub save_op_threshold: usize,
    /// §4.7: cap on the exponential save-retry backoff.
    #[serde(with = "duration_secs")]
    pub save_backoff_cap: Duration,
    /// §4.7: bounded deadline for the save attempted during Draining.
    #[serde(with = "duration_secs")]
    pub end_session_save_deadline: Duration,
    /// §4.1: maximum accepted envelope size in bytes.
    pub message_byte_budget: usize,
    /// §7: fatal-protocol-error count within `protocol_violation_window`.
    pub protocol_violation_limit: u32,
    #[serde(with = "duration_secs")]
    pub protocol_violation_window: Duration,
    /// SPEC_FULL.md §C.4: cell count ceiling per diagram.
    pub max_cells: usize,
    /// §4.2: grace period a read loop waits for room in a full Session
    /// inbox before giving up and disconnecting the endpoint.
    #[serde(with = "duration_secs")]
    pub inbox_send_grace_period: Duration,
    /// §4.2: per-write timeout the write loop gives each socket send.
    #[serde(with = "duration_secs")]
    pub socket_write_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            missed_pongs_limit: 2,
            slow_consumer_threshold: 3,
            slow_consumer_window: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15 * 60),
            participant_ttl: Duration::from_secs(10 * 60),
            auth_refresh_interval: Duration::from_secs(60),
            save_interval: Duration::from_secs(5),
            save_op_threshold: 50,
            save_backoff_cap: Duration::from_secs(30),
            end_session_save_deadline: Duration::from_secs(10),
            message_byte_budget: 256 * 1024,
            protocol_violation_limit: 3,
            protocol_violation_window: Duration::from_secs(10),
            max_cells: 10_000,
            inbox_send_grace_period: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(2),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let limits = SessionLimits::default();
        assert_eq!(limits.outbound_queue_capacity, 256);
        assert_eq!(limits.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(limits.missed_pongs_limit, 2);
        assert_eq!(limits.slow_consumer_threshold, 3);
        assert_eq!(limits.idle_timeout, Duration::from_secs(900));
        assert_eq!(limits.save_op_threshold, 50);
    }

    #[test]
    fn round_trips_through_toml() {
        let limits = SessionLimits::default();
        let toml_str = toml::to_string(&limits).expect("serialize");
        let parsed: SessionLimits = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(limits, parsed);
    }
}
