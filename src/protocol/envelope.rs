use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("No message handler for \"{0}\"")]
    UnknownMessageKind(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),
    #[error("malformed payload for \"{kind}\": {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode \"{kind}\" payload: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// The `{kind, payload}` unit exchanged over the transport.
///
/// This is the untyped form: it is produced by unpacking raw transport text and is
/// only turned into a typed message once the receiving side recognises `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub kind: String,
    #[serde(default)]
    pub payload: JsonValue,
}

impl RawEnvelope {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Destructure transport text into an envelope before any handler sees it.
    pub fn unpack(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedEnvelope)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            kind: "envelope",
            source,
        })
    }

    /// Deserialize the payload as `T`, attributing failures to this envelope's kind.
    pub fn payload<T: DeserializeOwned>(self) -> Result<T, ProtocolError> {
        let kind = self.kind;
        serde_json::from_value(self.payload)
            .map_err(|source| ProtocolError::MalformedPayload { kind, source })
    }
}

pub(crate) fn encode_payload<T: Serialize>(
    kind: &'static str,
    payload: &T,
) -> Result<RawEnvelope, ProtocolError> {
    let value =
        serde_json::to_value(payload).map_err(|source| ProtocolError::Encode { kind, source })?;
    Ok(RawEnvelope::new(kind, value))
}
