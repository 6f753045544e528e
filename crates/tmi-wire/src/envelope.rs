use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use tmi_protocol::UserId;

use crate::error::CodecError;

/// The wire-level envelope shape, before the `message_type`-specific payload
/// has been validated (spec.md §4.1): `{ "message_type": ..., "user": ...,
/// "timestamp": ..., ...payload-fields }`.
///
/// Inbound `user` is always ignored by the codec's callers (identity comes
/// from the authenticated endpoint); it is kept here only so a permissive
/// client that echoes it back doesn't fail structural validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub message_type: String,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawEnvelope {
    /// Parse and size-check a raw frame. `limit` is `SessionLimits::message_byte_budget`.
    pub fn decode(bytes: &[u8], limit: usize) -> Result<Self, CodecError> {
        if bytes.len() > limit {
            return Err(CodecError::Oversize {
                actual: bytes.len(),
                limit,
            });
        }
        serde_json::from_slice(bytes).map_err(CodecError::MalformedFraming)
    }

    /// Deserialize the flattened payload fields into a concrete struct,
    /// wrapping any error with the `message_type` for diagnostics.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|source| {
            CodecError::InvalidPayload {
                message_type: self.message_type.clone(),
                source,
            }
        })
    }

    pub fn build(
        message_type: &str,
        user: Option<UserId>,
        payload: Value,
    ) -> Result<Self, CodecError> {
        let fields = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        Ok(Self {
            message_type: message_type.to_string(),
            user,
            timestamp: Some(Utc::now()),
            fields,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::MalformedFraming)
    }
}
