use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::envelope::{encode_payload, ProtocolError, RawEnvelope};
use crate::registry::ComponentDescriptor;

/// Identifies the app source the worker should fetch and import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    #[serde(rename = "appName")]
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeElement {
    pub uid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEvent {
    pub uid: String,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseElement {
    pub uid: String,
}

/// Markup for the element whose identity attribute equals `uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPatch {
    pub uid: String,
    pub markup: String,
}

/// A message kind understood by one side of the transport.
pub trait Message: Sized {
    /// Decode a raw envelope; unknown kinds are rejected with
    /// [`ProtocolError::UnknownMessageKind`].
    fn decode(envelope: RawEnvelope) -> Result<Self, ProtocolError>;

    fn encode(&self) -> Result<RawEnvelope, ProtocolError>;

    fn kind(&self) -> &'static str;
}

/// Messages handled by the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Initialize,
    LoadApp(AppDescriptor),
    MakeElement(MakeElement),
    ElementEvent(ElementEvent),
    ReleaseElement(ReleaseElement),
}

impl WorkerMessage {
    pub const INITIALIZE: &'static str = "initialize";
    pub const LOAD_APP: &'static str = "load-app";
    pub const MAKE_ELEMENT: &'static str = "make-element";
    pub const ELEMENT_EVENT: &'static str = "element-event";
    pub const RELEASE_ELEMENT: &'static str = "release-element";
}

impl Message for WorkerMessage {
    fn decode(envelope: RawEnvelope) -> Result<Self, ProtocolError> {
        match envelope.kind.as_str() {
            Self::INITIALIZE => Ok(Self::Initialize),
            Self::LOAD_APP => envelope.payload().map(Self::LoadApp),
            Self::MAKE_ELEMENT => envelope.payload().map(Self::MakeElement),
            Self::ELEMENT_EVENT => envelope.payload().map(Self::ElementEvent),
            Self::RELEASE_ELEMENT => envelope.payload().map(Self::ReleaseElement),
            _ => Err(ProtocolError::UnknownMessageKind(envelope.kind)),
        }
    }

    fn encode(&self) -> Result<RawEnvelope, ProtocolError> {
        match self {
            Self::Initialize => Ok(RawEnvelope::new(Self::INITIALIZE, JsonValue::Null)),
            Self::LoadApp(app) => encode_payload(Self::LOAD_APP, app),
            Self::MakeElement(request) => encode_payload(Self::MAKE_ELEMENT, request),
            Self::ElementEvent(event) => encode_payload(Self::ELEMENT_EVENT, event),
            Self::ReleaseElement(release) => encode_payload(Self::RELEASE_ELEMENT, release),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Initialize => Self::INITIALIZE,
            Self::LoadApp(_) => Self::LOAD_APP,
            Self::MakeElement(_) => Self::MAKE_ELEMENT,
            Self::ElementEvent(_) => Self::ELEMENT_EVENT,
            Self::ReleaseElement(_) => Self::RELEASE_ELEMENT,
        }
    }
}

/// Messages handled by the page (foreground).
#[derive(Debug, Clone, PartialEq)]
pub enum PageMessage {
    Initialized(String),
    FinishedLoadApp(Vec<ComponentDescriptor>),
    RenderPatch(RenderPatch),
}

impl PageMessage {
    pub const INITIALIZED: &'static str = "initialized";
    pub const FINISHED_LOAD_APP: &'static str = "finished-loadapp";
    pub const RENDER_PATCH: &'static str = "render-patch";
}

impl Message for PageMessage {
    fn decode(envelope: RawEnvelope) -> Result<Self, ProtocolError> {
        match envelope.kind.as_str() {
            Self::INITIALIZED => envelope.payload().map(Self::Initialized),
            Self::FINISHED_LOAD_APP => envelope.payload().map(Self::FinishedLoadApp),
            Self::RENDER_PATCH => envelope.payload().map(Self::RenderPatch),
            _ => Err(ProtocolError::UnknownMessageKind(envelope.kind)),
        }
    }

    fn encode(&self) -> Result<RawEnvelope, ProtocolError> {
        match self {
            Self::Initialized(text) => encode_payload(Self::INITIALIZED, text),
            Self::FinishedLoadApp(snapshot) => encode_payload(Self::FINISHED_LOAD_APP, snapshot),
            Self::RenderPatch(patch) => encode_payload(Self::RENDER_PATCH, patch),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Initialized(_) => Self::INITIALIZED,
            Self::FinishedLoadApp(_) => Self::FINISHED_LOAD_APP,
            Self::RenderPatch(_) => Self::RENDER_PATCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_app_uses_camel_case_app_name() {
        let message = WorkerMessage::LoadApp(AppDescriptor {
            app_name: "counter".into(),
        });
        let envelope = message.encode().unwrap();
        assert_eq!(envelope.kind, "load-app");
        assert_eq!(envelope.payload, json!({"appName": "counter"}));
    }

    #[test]
    fn worker_side_rejects_page_kinds() {
        let envelope = RawEnvelope::new("render-patch", json!({"uid": "n1", "markup": ""}));
        let err = WorkerMessage::decode(envelope).unwrap_err();
        assert_eq!(err.to_string(), "No message handler for \"render-patch\"");
    }

    #[test]
    fn page_decodes_registry_snapshot() {
        let envelope = RawEnvelope::new("finished-loadapp", json!([{"name": "my-counter"}]));
        let message = PageMessage::decode(envelope).unwrap();
        match message {
            PageMessage::FinishedLoadApp(snapshot) => {
                assert_eq!(snapshot.len(), 1);
                assert_eq!(snapshot[0].name, "my-counter");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn initialize_tolerates_any_payload() {
        let envelope = RawEnvelope::new("initialize", json!({"ignored": true}));
        assert_eq!(
            WorkerMessage::decode(envelope).unwrap(),
            WorkerMessage::Initialize
        );
    }
}
