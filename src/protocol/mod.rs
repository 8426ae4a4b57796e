//! Envelope format and the dispatcher shape shared by both sides of the transport.

mod envelope;
mod messages;

pub use envelope::{ProtocolError, RawEnvelope};
pub use messages::{
    AppDescriptor, ElementEvent, MakeElement, Message, PageMessage, ReleaseElement, RenderPatch,
    WorkerMessage,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    /// The offending kind when the failure was an unrecognised message.
    pub fn unknown_kind(&self) -> Option<&str> {
        match self {
            Self::Protocol(ProtocolError::UnknownMessageKind(kind)) => Some(kind),
            _ => None,
        }
    }
}

/// One side's handler table, expressed as an exhaustive match over `Inbound`.
#[allow(async_fn_in_trait)]
pub trait Dispatcher {
    type Inbound: Message;
    type Outbound: Message;

    async fn handle(&mut self, message: Self::Inbound) -> anyhow::Result<Option<Self::Outbound>>;
}

/// Decode `envelope`, run the matching handler and wrap any reply as an envelope.
pub async fn dispatch<D: Dispatcher>(
    dispatcher: &mut D,
    envelope: RawEnvelope,
) -> Result<Option<RawEnvelope>, DispatchError> {
    let message = D::Inbound::decode(envelope)?;
    let kind = message.kind();
    tracing::debug!(target: "protocol", kind, "dispatching message");
    let reply = dispatcher.handle(message).await?;
    match reply {
        Some(reply) => Ok(Some(reply.encode()?)),
        None => Ok(None),
    }
}
