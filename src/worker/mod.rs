//! The background context: a dedicated thread that owns the guest interpreter and
//! answers page requests one message at a time.

pub mod bridge;

use std::thread::{self, JoinHandle};

use anyhow::{Context as AnyhowContext, Result};
use tracing::{debug, error};

pub use bridge::{BridgeError, RuntimeBridge, RuntimeContext, LOADER_PACKAGE, READY_MESSAGE};

use crate::fetch::SourceFetcher;
use crate::js::InterpreterLoader;
use crate::protocol::{dispatch, Dispatcher, PageMessage, RawEnvelope, WorkerMessage};
use crate::transport::{self, Port};

/// The worker's handler table.
pub struct WorkerScope<L: InterpreterLoader, F> {
    bridge: RuntimeBridge<L, F>,
}

impl<L, F> WorkerScope<L, F>
where
    L: InterpreterLoader,
    F: SourceFetcher,
{
    pub fn new(bridge: RuntimeBridge<L, F>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &RuntimeBridge<L, F> {
        &self.bridge
    }
}

impl<L, F> Dispatcher for WorkerScope<L, F>
where
    L: InterpreterLoader,
    F: SourceFetcher,
{
    type Inbound = WorkerMessage;
    type Outbound = PageMessage;

    async fn handle(&mut self, message: WorkerMessage) -> anyhow::Result<Option<PageMessage>> {
        let reply = match message {
            WorkerMessage::Initialize => {
                let ready = self.bridge.bootstrap().await?;
                Some(PageMessage::Initialized(ready.to_string()))
            }
            WorkerMessage::LoadApp(app) => {
                let snapshot = self.bridge.load_app(&app.app_name).await?;
                Some(PageMessage::FinishedLoadApp(snapshot))
            }
            WorkerMessage::MakeElement(request) => {
                let patch = self.bridge.make_element(&request.uid, &request.name)?;
                Some(PageMessage::RenderPatch(patch))
            }
            WorkerMessage::ElementEvent(event) => {
                let patch = self.bridge.element_event(&event.uid, &event.event)?;
                Some(PageMessage::RenderPatch(patch))
            }
            WorkerMessage::ReleaseElement(release) => {
                let existed = self.bridge.release_element(&release.uid)?;
                debug!(target: "worker", uid = %release.uid, existed, "released element");
                None
            }
        };
        Ok(reply)
    }
}

/// Serve messages from `port` until the page side goes away.
///
/// Each message is unpacked, handled and answered before the next one is read.
/// Failures are logged and the loop keeps serving.
pub async fn serve<L, F>(mut port: Port, mut scope: WorkerScope<L, F>)
where
    L: InterpreterLoader,
    F: SourceFetcher,
{
    while let Some(text) = port.recv().await {
        let envelope = match RawEnvelope::unpack(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(target: "worker", error = %err, "dropping malformed message");
                continue;
            }
        };
        let kind = envelope.kind.clone();

        match dispatch(&mut scope, envelope).await {
            Ok(Some(reply)) => {
                if let Err(err) = port.post_envelope(&reply) {
                    error!(target: "worker", kind = %kind, error = %err, "failed to post reply");
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(target: "worker", kind = %kind, error = %format!("{err:#}"), "message handler failed");
            }
        }
    }
    debug!(target: "worker", "page port closed; worker exiting");
}

/// Handle to a spawned worker thread.
pub struct Worker {
    thread: JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker thread and return the page's end of the transport.
    ///
    /// The interpreter is created on the worker thread, so only the loader and the
    /// fetcher cross threads.
    pub fn spawn<L, F>(loader: L, fetcher: F) -> Result<(Port, Worker)>
    where
        L: InterpreterLoader + Send + 'static,
        F: SourceFetcher + Send + 'static,
    {
        let (page_port, worker_port) = transport::channel();
        let thread = thread::Builder::new()
            .name("component-worker".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!(target: "worker", error = %err, "failed to build worker runtime");
                        return;
                    }
                };
                let scope = WorkerScope::new(RuntimeBridge::new(loader, fetcher));
                runtime.block_on(serve(worker_port, scope));
            })
            .context("failed to spawn worker thread")?;
        Ok((page_port, Worker { thread }))
    }

    /// Wait for the worker to exit. It exits once the page port is dropped.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BundledSources;
    use crate::js::QuickJsLoader;
    use crate::protocol::{Message, RawEnvelope};
    use serde_json::json;

    fn scope() -> WorkerScope<QuickJsLoader, BundledSources> {
        WorkerScope::new(RuntimeBridge::new(QuickJsLoader, BundledSources::bundled()))
    }

    #[tokio::test]
    async fn rejects_an_invalid_kind() {
        let mut scope = scope();
        let err = dispatch(&mut scope, RawEnvelope::new("xxx", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No message handler for \"xxx\"");
        assert_eq!(err.unknown_kind(), Some("xxx"));
    }

    #[tokio::test]
    async fn initialize_replies_initialized() {
        let mut scope = scope();
        let reply = dispatch(&mut scope, WorkerMessage::Initialize.encode().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, "initialized");
        assert_eq!(reply.payload, json!(READY_MESSAGE));
    }

    #[tokio::test]
    async fn load_app_replies_with_snapshot() {
        let mut scope = scope();
        dispatch(&mut scope, WorkerMessage::Initialize.encode().unwrap())
            .await
            .unwrap();
        let reply = dispatch(
            &mut scope,
            RawEnvelope::new("load-app", json!({"appName": "counter"})),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.kind, "finished-loadapp");
        assert_eq!(reply.payload, json!([{"name": "my-counter"}]));
    }

    #[tokio::test]
    async fn release_has_no_reply() {
        let mut scope = scope();
        dispatch(&mut scope, WorkerMessage::Initialize.encode().unwrap())
            .await
            .unwrap();
        let reply = dispatch(&mut scope, RawEnvelope::new("release-element", json!({"uid": "n9"})))
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn serve_answers_over_the_transport() {
        let (mut page, worker) = transport::channel();
        let server = serve(worker, scope());
        let client = async move {
            page.post_text("not json".into()).unwrap();
            page.post_message(&WorkerMessage::Initialize).unwrap();
            let reply = RawEnvelope::unpack(&page.recv().await.unwrap()).unwrap();
            drop(page);
            reply
        };
        let ((), reply) = tokio::join!(server, client);
        assert_eq!(reply.kind, "initialized");
    }
}
