use tmi_protocol::UserId;
use tmi_wire::OutboundMessage;

/// Why a [`ParticipantSink`] is being torn down, passed through to
/// `ClientEndpoint` so it knows what to flush before closing the socket
/// (spec.md §4.2's graceful-close and §9's endpoint-ownership note: the
/// transport is owned by the `Session` for the duration of membership, and
/// this is the only channel the `Session` uses to reach it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    AuthorizationDenied,
    SlowConsumer,
    SessionEnded,
    Kicked,
    /// Per-participant TTL elapsed with no inbound activity (SPEC_FULL.md
    /// §C.1), distinct from the whole-session idle timeout which drains the
    /// session rather than a single participant.
    ParticipantTtlExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The endpoint's bounded outbound queue is full. The `Session` counts
    /// these per endpoint and disconnects after
    /// `SessionLimits::slow_consumer_threshold` within
    /// `SessionLimits::slow_consumer_window` (spec.md §4.2).
    QueueFull,
    /// The endpoint is already gone; callers should drop their reference.
    Closed,
}

/// What a `Session` holds per participant to reach their `ClientEndpoint`.
/// Non-blocking by design: the session serializer must never wait on a
/// slow client (spec.md §5's "no suspension inside OperationApplier" and
/// the general no-lock, no-block rule for the per-session actor).
pub trait ParticipantSink: Send + Sync {
    fn try_send(&self, user_for_envelope: Option<UserId>, message: OutboundMessage) -> Result<(), SendError>;

    /// Ask the endpoint to flush, send a final message if given, and close.
    fn disconnect(&self, reason: DisconnectReason, final_message: Option<OutboundMessage>);
}
