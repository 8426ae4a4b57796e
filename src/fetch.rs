use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no source named {0}")]
    Missing(String),
    #[error("invalid source URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Retrieves guest source text by name (`components.js`, `counter.js`, ...).
#[allow(async_fn_in_trait)]
pub trait SourceFetcher {
    async fn fetch(&self, name: &str) -> Result<String, FetchError>;
}

/// Fetches sources over HTTP relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        let url = resolve_url(name, &self.base_url)?;
        tracing::debug!(target: "fetch", url = %url, "fetching");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

fn resolve_url(name: &str, base: &Url) -> Result<Url, url::ParseError> {
    if name.starts_with("http://") || name.starts_with("https://") || name.starts_with("file://")
    {
        return Url::parse(name);
    }
    base.join(name)
}

/// Serves sources from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceFetcher for DirectoryFetcher {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        let relative = Path::new(name.trim_start_matches("./"));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(FetchError::Missing(name.to_string()));
        }

        let path = self.root.join(relative);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::Missing(name.to_string()))
            }
            Err(err) => Err(FetchError::Io(err)),
        }
    }
}

/// In-memory sources, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BundledSources {
    sources: HashMap<String, String>,
}

impl BundledSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// The component loader and the counter app shipped with this crate.
    pub fn bundled() -> Self {
        Self::new()
            .with("components.js", include_str!("../assets/components.js"))
            .with("counter.js", include_str!("../assets/counter.js"))
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.sources.remove(name);
        self
    }
}

impl SourceFetcher for BundledSources {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        self.sources
            .get(name.trim_start_matches("./"))
            .cloned()
            .ok_or_else(|| FetchError::Missing(name.to_string()))
    }
}

/// Any of the fetchers, chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum Sources {
    Http(HttpFetcher),
    Directory(DirectoryFetcher),
    Bundled(BundledSources),
}

impl SourceFetcher for Sources {
    async fn fetch(&self, name: &str) -> Result<String, FetchError> {
        match self {
            Self::Http(fetcher) => fetcher.fetch(name).await,
            Self::Directory(fetcher) => fetcher.fetch(name).await,
            Self::Bundled(fetcher) => fetcher.fetch(name).await,
        }
    }
}
