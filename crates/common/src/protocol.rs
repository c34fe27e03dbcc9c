//! Control-channel wire protocol.
//!
//! Messages travel as JSON objects over the peer data channel, next to
//! (never inside) the media call. The `type` field selects the variant:
//!
//! ```json
//! { "type": "nickname", "nickname": "Alice" }
//! ```
//!
//! Both ends must agree on this shape. Unknown types are reported as
//! [`ProtocolError::UnknownType`] so receivers can skip them.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire tag of [`ControlMessage::Nickname`].
pub const NICKNAME_TYPE: &str = "nickname";

/// A structured message on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Sender's display name, sent as soon as the channel opens.
    Nickname { nickname: String },
}

impl ControlMessage {
    #[must_use]
    pub fn nickname(nickname: impl Into<String>) -> Self {
        Self::Nickname {
            nickname: nickname.into(),
        }
    }

    /// Encode for the data channel.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Encode`] if serialization fails.
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a payload received on the data channel.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Malformed`] when the payload has no string `type` or
    /// its fields do not match, [`ProtocolError::UnknownType`] otherwise.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing type field".to_string()))?;

        match kind {
            NICKNAME_TYPE => serde_json::from_value(value.clone())
                .map_err(|e| ProtocolError::Malformed(e.to_string())),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}
