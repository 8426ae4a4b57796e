//! Custom elements whose behaviour lives in a guest interpreter on a background
//! worker, rendered into the page through structural patches.

pub mod config;
pub mod fetch;
pub mod js;
pub mod page;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod worker;

// Re-export commonly used types for tests
pub use config::WorkerConfig;
pub use fetch::{BundledSources, SourceFetcher, Sources};
pub use js::QuickJsLoader;
pub use page::Page;
pub use registry::{ComponentDescriptor, RegistrySnapshot};
pub use worker::Worker;
