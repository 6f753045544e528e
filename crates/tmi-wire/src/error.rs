use thiserror::Error;

/// How a codec failure should be treated by the endpoint that received it
/// (spec.md §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Closes the connection immediately: malformed framing, oversize payload.
    ImmediatelyFatal,
    /// Reported to the sender as a non-fatal `error`; the caller is
    /// responsible for counting these toward the "three within 10s" rule.
    Recoverable,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("envelope exceeds the configured byte budget ({actual} > {limit})")]
    Oversize { actual: usize, limit: usize },

    #[error("malformed envelope: {0}")]
    MalformedFraming(serde_json::Error),

    #[error("unknown message_type: {0}")]
    UnknownMessageType(String),

    #[error("invalid payload for message_type {message_type}: {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    pub fn severity(&self) -> Severity {
        match self {
            CodecError::Oversize { .. } | CodecError::MalformedFraming(_) => {
                Severity::ImmediatelyFatal
            }
            CodecError::UnknownMessageType(_) | CodecError::InvalidPayload { .. } => {
                Severity::Recoverable
            }
        }
    }

    /// Stable machine-readable error code (spec.md §7).
    pub fn code(&self) -> &'static str {
        "protocol"
    }
}
