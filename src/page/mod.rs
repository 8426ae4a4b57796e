//! The foreground: a document whose custom elements are rendered by the worker.

pub mod elements;
pub mod morph;

use kuchiki::traits::*;
use kuchiki::NodeRef;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use elements::{
    ElementDefinition, ElementError, ElementInstance, ElementRegistry, LifecycleState,
    UID_ATTRIBUTE,
};

use crate::protocol::{
    dispatch, AppDescriptor, DispatchError, Dispatcher, ElementEvent, MakeElement, PageMessage,
    RawEnvelope, ReleaseElement, WorkerMessage,
};
use crate::registry::{ComponentDescriptor, RegistrySnapshot};
use crate::transport::{Port, TransportError};

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Element(#[from] ElementError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A page whose defined custom elements are materialized by a worker.
pub struct Page {
    document: NodeRef,
    port: Port,
    elements: ElementRegistry,
    registry: RegistrySnapshot,
    app: Option<String>,
}

impl Page {
    pub fn new(html: &str, port: Port) -> Self {
        Self {
            document: kuchiki::parse_html().one(html),
            port,
            elements: ElementRegistry::new(),
            registry: Vec::new(),
            app: None,
        }
    }

    /// Request `app` automatically once the worker reports readiness.
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn document(&self) -> &NodeRef {
        &self.document
    }

    /// The last registry snapshot received from the worker.
    pub fn registry(&self) -> &[ComponentDescriptor] {
        &self.registry
    }

    pub fn elements(&self) -> &ElementRegistry {
        &self.elements
    }

    pub fn to_html(&self) -> String {
        self.document.to_string()
    }

    pub fn select_first(&self, selector: &str) -> Option<NodeRef> {
        self.document
            .select_first(selector)
            .ok()
            .map(|element| element.as_node().clone())
    }

    /// Ask the worker to bootstrap its runtime.
    pub fn initialize(&self) -> Result<(), PageError> {
        self.port.post_message(&WorkerMessage::Initialize)?;
        Ok(())
    }

    pub fn load_app(&self, app_name: &str) -> Result<(), PageError> {
        self.port
            .post_message(&WorkerMessage::LoadApp(AppDescriptor {
                app_name: app_name.to_string(),
            }))?;
        Ok(())
    }

    /// Wait for the next worker message and handle it. Returns the handled kind, or
    /// `None` once the worker has gone away.
    pub async fn next_message(&mut self) -> Result<Option<String>, PageError> {
        let Some(text) = self.port.recv().await else {
            return Ok(None);
        };
        let envelope = RawEnvelope::unpack(&text).map_err(DispatchError::from)?;
        let kind = envelope.kind.clone();
        self.handle_envelope(envelope).await?;
        Ok(Some(kind))
    }

    pub async fn handle_envelope(&mut self, envelope: RawEnvelope) -> Result<(), DispatchError> {
        dispatch(self, envelope).await.map(|_| ())
    }

    pub fn finished_initialize(&mut self, status: &str) -> Result<(), PageError> {
        info!(target: "page", status, "worker ready");
        self.set_status(status);
        if let Some(app) = self.app.clone() {
            self.load_app(&app)?;
        }
        Ok(())
    }

    pub fn finished_load_app(&mut self, snapshot: RegistrySnapshot) -> Result<(), PageError> {
        debug!(target: "page", components = snapshot.len(), "registry snapshot received");
        self.registry = snapshot;
        let registry = self.registry.clone();
        self.define_all_from_registry(&registry)
    }

    pub fn status_text(&self) -> Option<String> {
        self.select_first("#status").map(|node| node.text_contents())
    }

    fn set_status(&self, text: &str) {
        let Some(status) = self.select_first("#status") else {
            debug!(target: "page", "no #status element to report readiness in");
            return;
        };
        for child in status.children().collect::<Vec<_>>() {
            child.detach();
        }
        status.append(NodeRef::new_text(text));
    }

    /// Define the custom element `name` and upgrade matching elements already in
    /// the document. Defining a name twice is a no-op.
    pub fn define_component(&mut self, name: &str) -> Result<ElementDefinition, PageError> {
        if !self.elements.define(name)? {
            debug!(target: "page", name, "custom element already defined");
        }
        let document = self.document.clone();
        self.upgrade_subtree(&document)?;
        let definition = self
            .elements
            .get(name)
            .cloned()
            .ok_or_else(|| ElementError::InvalidName(name.to_string()))?;
        Ok(definition)
    }

    pub fn define_all_from_registry(
        &mut self,
        snapshot: &[ComponentDescriptor],
    ) -> Result<(), PageError> {
        for descriptor in snapshot {
            self.define_component(&descriptor.name)?;
        }
        Ok(())
    }

    /// Create a detached element. Defined custom elements are constructed right away
    /// and so already carry a uid.
    pub fn create_element(&mut self, tag: &str) -> Result<NodeRef, PageError> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ElementError::InvalidName(tag.to_string()).into());
        }
        let fragment = kuchiki::parse_html().one(format!("<{tag}></{tag}>"));
        let node = fragment
            .select_first(tag)
            .map(|element| element.as_node().clone())
            .map_err(|_| ElementError::InvalidName(tag.to_string()))?;
        node.detach();
        self.construct(&node);
        Ok(node)
    }

    /// Append `node` to `parent`; defined elements that become connected ask the
    /// worker to render them.
    pub fn attach(&mut self, parent: &NodeRef, node: NodeRef) -> Result<(), PageError> {
        parent.append(node.clone());
        self.upgrade_subtree(&node)
    }

    /// Remove `node` from the tree. Its components are released in the worker;
    /// patches that still arrive for them are ignored.
    pub fn detach(&mut self, node: &NodeRef) -> Result<(), PageError> {
        node.detach();
        self.release_subtree(node)
    }

    /// The connected element whose uid attribute equals `uid`.
    pub fn element_by_uid(&self, uid: &str) -> Option<NodeRef> {
        self.document
            .descendants()
            .find(|node| uid_of(node).as_deref() == Some(uid))
    }

    /// Merge `markup` into the element owning `uid`. Returns `false` when no such
    /// element is connected, which is not an error.
    pub fn apply_patch(&mut self, uid: &str, markup: &str) -> Result<bool, PageError> {
        let Some(target) = self.element_by_uid(uid) else {
            debug!(target: "page", uid, "no element for render patch; ignoring");
            return Ok(false);
        };

        let summary = morph::morph_children(&target, markup);
        self.elements.patched(uid);
        debug!(
            target: "page",
            uid,
            updated = summary.updated,
            inserted = summary.inserted.len(),
            removed = summary.removed.len(),
            "applied render patch"
        );
        for removed in &summary.removed {
            self.release_subtree(removed)?;
        }
        for inserted in &summary.inserted {
            self.upgrade_subtree(inserted)?;
        }
        Ok(true)
    }

    /// Forward a DOM event for `uid` to the worker. Returns `false` for elements
    /// that are not connected.
    pub fn dispatch_event(&self, uid: &str, event: &str) -> Result<bool, PageError> {
        let connected = self
            .elements
            .instance(uid)
            .is_some_and(|instance| instance.state.is_connected());
        if !connected {
            warn!(target: "page", uid, event, "event for an element that is not connected");
            return Ok(false);
        }
        self.port
            .post_message(&WorkerMessage::ElementEvent(ElementEvent {
                uid: uid.to_string(),
                event: event.to_string(),
            }))?;
        Ok(true)
    }

    fn is_connected(&self, node: &NodeRef) -> bool {
        node.inclusive_ancestors()
            .any(|ancestor| ancestor == self.document)
    }

    /// Construct every defined element under `root`, and connect them if `root` is
    /// in the document.
    fn upgrade_subtree(&mut self, root: &NodeRef) -> Result<(), PageError> {
        let connected = self.is_connected(root);
        let candidates: Vec<NodeRef> = root
            .inclusive_descendants()
            .filter(|node| self.definition_name(node).is_some())
            .collect();

        for node in candidates {
            let Some((uid, name)) = self.construct(&node) else {
                continue;
            };
            if connected && self.elements.attached(&uid) {
                debug!(target: "page", uid = %uid, name = %name, "element attached");
                self.port
                    .post_message(&WorkerMessage::MakeElement(MakeElement { uid, name }))?;
            }
        }
        Ok(())
    }

    /// Disconnect every live element under the already detached `root`.
    fn release_subtree(&mut self, root: &NodeRef) -> Result<(), PageError> {
        for uid in root.inclusive_descendants().filter_map(|n| uid_of(&n)) {
            if self.elements.detached(&uid) {
                debug!(target: "page", uid = %uid, "element detached");
                self.port
                    .post_message(&WorkerMessage::ReleaseElement(ReleaseElement { uid }))?;
            }
        }
        Ok(())
    }

    /// Run the construction step for a defined element: mint a uid unless the
    /// element already has one of ours.
    fn construct(&mut self, node: &NodeRef) -> Option<(String, String)> {
        let name = self.definition_name(node)?;
        if let Some(uid) = uid_of(node).filter(|uid| self.elements.instance(uid).is_some()) {
            return Some((uid, name));
        }

        let uid = elements::mint_uid();
        let element = node.as_element()?;
        element
            .attributes
            .borrow_mut()
            .insert(UID_ATTRIBUTE, uid.clone());
        self.elements.constructed(&uid, &name);
        Some((uid, name))
    }

    fn definition_name(&self, node: &NodeRef) -> Option<String> {
        let element = node.as_element()?;
        let name: &str = &element.name.local;
        self.elements.is_defined(name).then(|| name.to_string())
    }
}

impl Dispatcher for Page {
    type Inbound = PageMessage;
    type Outbound = WorkerMessage;

    async fn handle(&mut self, message: PageMessage) -> anyhow::Result<Option<WorkerMessage>> {
        match message {
            PageMessage::Initialized(status) => self.finished_initialize(&status)?,
            PageMessage::FinishedLoadApp(snapshot) => self.finished_load_app(snapshot)?,
            PageMessage::RenderPatch(patch) => {
                self.apply_patch(&patch.uid, &patch.markup)?;
            }
        }
        Ok(None)
    }
}

/// The uid attribute of `node`, if it is an element that has one.
pub fn uid_of(node: &NodeRef) -> Option<String> {
    node.as_element()?
        .attributes
        .borrow()
        .get(UID_ATTRIBUTE)
        .map(str::to_string)
}
