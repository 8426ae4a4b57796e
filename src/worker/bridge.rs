use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fetch::SourceFetcher;
use crate::js::{GuestError, GuestInterpreter, InterpreterLoader, ModuleHandle, VfsError};
use crate::protocol::RenderPatch;
use crate::registry::{Registry, RegistrySnapshot};

pub const READY_MESSAGE: &str = "Component worker is initialized";

/// Directory (and module name) the component loader is staged under.
pub const LOADER_PACKAGE: &str = "components";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("the worker runtime has not been bootstrapped")]
    NotReady,
    #[error("the component loader is not available")]
    LoaderUnavailable,
    #[error("no component registered as \"{0}\"")]
    UnregisteredComponent(String),
    #[error("{function} returned {value} where markup was expected")]
    UnexpectedGuestValue {
        function: &'static str,
        value: JsonValue,
    },
    #[error("failed to load the interpreter: {0}")]
    Load(#[source] anyhow::Error),
    #[error(transparent)]
    Guest(#[from] GuestError),
    #[error(transparent)]
    Filesystem(#[from] VfsError),
    #[error("invalid registry export: {0}")]
    Registry(#[source] serde_json::Error),
}

/// Everything that exists once the interpreter has been constructed.
pub struct RuntimeContext<I> {
    interpreter: I,
    loader: Option<ModuleHandle>,
    registry: Registry,
}

impl<I: GuestInterpreter> RuntimeContext<I> {
    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }
}

pub enum RuntimeState<I> {
    Uninitialized,
    Ready(RuntimeContext<I>),
}

/// Owns the guest runtime on the worker side and implements the worker's operations.
pub struct RuntimeBridge<L: InterpreterLoader, F> {
    loader: L,
    fetcher: F,
    state: RuntimeState<L::Interpreter>,
}

impl<L, F> RuntimeBridge<L, F>
where
    L: InterpreterLoader,
    F: SourceFetcher,
{
    pub fn new(loader: L, fetcher: F) -> Self {
        Self {
            loader,
            fetcher,
            state: RuntimeState::Uninitialized,
        }
    }

    pub fn context(&self) -> Option<&RuntimeContext<L::Interpreter>> {
        match &self.state {
            RuntimeState::Uninitialized => None,
            RuntimeState::Ready(context) => Some(context),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.context().is_some()
    }

    /// Construct the interpreter and stage the component loader. Idempotent.
    pub async fn bootstrap(&mut self) -> Result<&'static str, BridgeError> {
        if self.is_ready() {
            debug!(target: "worker", "bootstrap requested on a ready runtime");
            return Ok(READY_MESSAGE);
        }

        let interpreter = self.loader.load().map_err(BridgeError::Load)?;
        let mut context = RuntimeContext {
            interpreter,
            loader: None,
            registry: Registry::new(),
        };

        let loader_file = format!("{LOADER_PACKAGE}.js");
        match self.fetcher.fetch(&loader_file).await {
            Ok(source) => {
                if let Err(err) = install_loader(&mut context, &source) {
                    error!(
                        target: "worker",
                        error = %err,
                        "failed to install the component loader; components cannot be loaded"
                    );
                    context.loader = None;
                    context.registry = Registry::new();
                }
            }
            Err(err) => {
                warn!(
                    target: "worker",
                    file = %loader_file,
                    error = %err,
                    "failed to fetch the component loader; components cannot be loaded"
                );
            }
        }

        info!(target: "worker", components = context.registry.len(), "runtime ready");
        self.state = RuntimeState::Ready(context);
        Ok(READY_MESSAGE)
    }

    /// Stage and import `app_name`, let it register its components and return the
    /// new registry snapshot.
    pub async fn load_app(&mut self, app_name: &str) -> Result<RegistrySnapshot, BridgeError> {
        let context = ready(&mut self.state)?;
        let loader = loader_of(context)?;

        let file = format!("{app_name}.js");
        let source = match self.fetcher.fetch(&file).await {
            Ok(source) => source,
            Err(err) => {
                warn!(target: "worker", file = %file, error = %err, "failed to fetch app source");
                String::new()
            }
        };

        stage(context, &file, &source)?;
        let app = context.interpreter.import(app_name)?;
        context
            .interpreter
            .call(&loader, "initializeApp", &[(&app).into()])?;
        refresh_registry(context)?;

        info!(
            target: "worker",
            app = app_name,
            components = context.registry.len(),
            "app loaded"
        );
        Ok(context.registry.snapshot())
    }

    /// Materialize an instance of component `name` for element `uid`.
    pub fn make_element(&mut self, uid: &str, name: &str) -> Result<RenderPatch, BridgeError> {
        let context = ready(&mut self.state)?;
        let loader = loader_of(context)?;
        if !context.registry.contains(name) {
            return Err(BridgeError::UnregisteredComponent(name.to_string()));
        }

        let value = context
            .interpreter
            .call(&loader, "makeElement", &[uid.into(), name.into()])?;
        Ok(RenderPatch {
            uid: uid.to_string(),
            markup: markup_from(value, "makeElement")?,
        })
    }

    /// Deliver a DOM event to the instance behind `uid` and re-render it.
    pub fn element_event(&mut self, uid: &str, event: &str) -> Result<RenderPatch, BridgeError> {
        let context = ready(&mut self.state)?;
        let loader = loader_of(context)?;
        let value = context
            .interpreter
            .call(&loader, "handleEvent", &[uid.into(), event.into()])?;
        Ok(RenderPatch {
            uid: uid.to_string(),
            markup: markup_from(value, "handleEvent")?,
        })
    }

    /// Drop the guest instance behind `uid`. Returns whether one existed.
    pub fn release_element(&mut self, uid: &str) -> Result<bool, BridgeError> {
        let context = ready(&mut self.state)?;
        let loader = loader_of(context)?;
        let value = context
            .interpreter
            .call(&loader, "releaseElement", &[uid.into()])?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

fn ready<I>(state: &mut RuntimeState<I>) -> Result<&mut RuntimeContext<I>, BridgeError> {
    match state {
        RuntimeState::Uninitialized => Err(BridgeError::NotReady),
        RuntimeState::Ready(context) => Ok(context),
    }
}

fn loader_of<I>(context: &RuntimeContext<I>) -> Result<ModuleHandle, BridgeError> {
    context.loader.clone().ok_or(BridgeError::LoaderUnavailable)
}

fn install_loader<I: GuestInterpreter>(
    context: &mut RuntimeContext<I>,
    source: &str,
) -> Result<(), BridgeError> {
    if !context.interpreter.filesystem().path_exists(LOADER_PACKAGE) {
        context.interpreter.filesystem_mut().mkdir(LOADER_PACKAGE)?;
    }
    stage(context, &format!("{LOADER_PACKAGE}/index.js"), source)?;
    context.loader = Some(context.interpreter.import(LOADER_PACKAGE)?);
    refresh_registry(context)
}

/// Write `source` and invalidate the import cache so the next import sees it.
fn stage<I: GuestInterpreter>(
    context: &mut RuntimeContext<I>,
    path: &str,
    source: &str,
) -> Result<(), BridgeError> {
    context.interpreter.filesystem_mut().write(path, source)?;
    context.interpreter.invalidate_import_cache();
    debug!(target: "worker", path, bytes = source.len(), "staged source");
    Ok(())
}

fn refresh_registry<I: GuestInterpreter>(
    context: &mut RuntimeContext<I>,
) -> Result<(), BridgeError> {
    let loader = loader_of(context)?;
    let exported = context.interpreter.call(&loader, "getRegistry", &[])?;
    context.registry = Registry::from_guest(exported).map_err(BridgeError::Registry)?;
    Ok(())
}

fn markup_from(value: JsonValue, function: &'static str) -> Result<String, BridgeError> {
    match value {
        JsonValue::String(markup) => Ok(markup),
        other => Err(BridgeError::UnexpectedGuestValue {
            function,
            value: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{BundledSources, FetchError};
    use crate::js::QuickJsLoader;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Bundled sources that record every name requested.
    struct RecordingFetcher {
        sources: BundledSources,
        requested: Rc<RefCell<Vec<String>>>,
    }

    impl SourceFetcher for RecordingFetcher {
        async fn fetch(&self, name: &str) -> Result<String, FetchError> {
            self.requested.borrow_mut().push(name.to_string());
            self.sources.fetch(name).await
        }
    }

    fn bridge(sources: BundledSources) -> RuntimeBridge<QuickJsLoader, BundledSources> {
        RuntimeBridge::new(QuickJsLoader, sources)
    }

    #[tokio::test]
    async fn operations_require_bootstrap() {
        let mut bridge = bridge(BundledSources::bundled());
        assert!(matches!(
            bridge.load_app("counter").await,
            Err(BridgeError::NotReady)
        ));
        assert!(matches!(
            bridge.make_element("n1", "my-counter"),
            Err(BridgeError::NotReady)
        ));
    }

    #[tokio::test]
    async fn bootstrap_stages_loader_with_empty_registry() {
        let mut bridge = bridge(BundledSources::bundled());
        assert_eq!(bridge.bootstrap().await.unwrap(), READY_MESSAGE);

        let context = bridge.context().unwrap();
        assert!(context.has_loader());
        assert!(context.registry().is_empty());
        assert!(context
            .interpreter()
            .filesystem()
            .path_exists("components/index.js"));
    }

    #[tokio::test]
    async fn missing_loader_leaves_runtime_degraded() {
        let mut bridge = bridge(BundledSources::bundled().without("components.js"));
        assert_eq!(bridge.bootstrap().await.unwrap(), READY_MESSAGE);
        assert!(bridge.is_ready());
        assert!(!bridge.context().unwrap().has_loader());
        assert!(matches!(
            bridge.load_app("counter").await,
            Err(BridgeError::LoaderUnavailable)
        ));
    }

    #[tokio::test]
    async fn missing_app_source_surfaces_guest_error() {
        let mut bridge = bridge(BundledSources::bundled().without("counter.js"));
        bridge.bootstrap().await.unwrap();
        let err = bridge.load_app("counter").await.unwrap_err();
        assert!(matches!(err, BridgeError::Guest(GuestError::Exception(_))));
        assert!(bridge.context().unwrap().registry().is_empty());
    }

    #[tokio::test]
    async fn counter_renders_and_handles_clicks() {
        let mut bridge = bridge(BundledSources::bundled());
        bridge.bootstrap().await.unwrap();
        bridge.load_app("counter").await.unwrap();

        let patch = bridge.make_element("n123", "my-counter").unwrap();
        assert_eq!(patch.uid, "n123");
        assert!(patch.markup.contains("<span>0"));

        let patch = bridge.element_event("n123", "click").unwrap();
        assert!(patch.markup.contains("<span>1"));

        assert!(bridge.release_element("n123").unwrap());
        assert!(bridge.element_event("n123", "click").is_err());
    }

    #[tokio::test]
    async fn unregistered_component_is_an_error() {
        let mut bridge = bridge(BundledSources::bundled());
        bridge.bootstrap().await.unwrap();
        let err = bridge.make_element("n1", "my-counter").unwrap_err();
        assert!(matches!(err, BridgeError::UnregisteredComponent(name) if name == "my-counter"));
    }

    #[tokio::test]
    async fn load_app_checks_readiness_before_fetching() {
        let requested = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = RuntimeBridge::new(
            QuickJsLoader,
            RecordingFetcher {
                sources: BundledSources::bundled().without("components.js"),
                requested: Rc::clone(&requested),
            },
        );

        assert!(matches!(
            bridge.load_app("counter").await,
            Err(BridgeError::NotReady)
        ));
        assert!(requested.borrow().is_empty());

        bridge.bootstrap().await.unwrap();
        assert!(matches!(
            bridge.load_app("counter").await,
            Err(BridgeError::LoaderUnavailable)
        ));
        assert_eq!(*requested.borrow(), ["components.js"]);
    }
}
