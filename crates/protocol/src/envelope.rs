use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::MessageType;

/// Envelope for all session-channel communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until the message type is known. A missing or `null`
/// payload is represented as `None` and always serialized as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            msg_type,
            payload: raw,
        })
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Deserializes the payload, failing if it is absent.
    pub fn require_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        self.parse_payload()?
            .ok_or(ProtocolError::MissingPayload(self.msg_type))
    }
}
