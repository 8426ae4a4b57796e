use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::fetch::{DirectoryFetcher, HttpFetcher, Sources};

const DEFAULT_ASSET_ROOT: &str = "assets";
const DEFAULT_APP: &str = "counter";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read worker config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse source URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    asset_root: Option<PathBuf>,
    base_url: Option<String>,
    app: Option<String>,
}

/// Where guest sources come from and which app the page loads.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    asset_root: PathBuf,
    base_url: Option<Url>,
    app: String,
}

impl WorkerConfig {
    /// Read the YAML file at `config_path`. A missing path or file gives the defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let raw = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str::<Option<RawConfig>>(&contents)?.unwrap_or_default()
            }
            _ => RawConfig::default(),
        };

        let base_url = raw.base_url.as_deref().map(Url::parse).transpose()?;

        Ok(Self {
            asset_root: raw
                .asset_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT)),
            base_url,
            app: raw.app.unwrap_or_else(|| DEFAULT_APP.to_string()),
        })
    }

    pub fn asset_root(&self) -> &PathBuf {
        &self.asset_root
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// The fetcher the worker stages sources from: HTTP when a base URL is
    /// configured, otherwise the asset directory.
    pub fn sources(&self) -> Sources {
        match &self.base_url {
            Some(base) => Sources::Http(HttpFetcher::new(base.clone())),
            None => Sources::Directory(DirectoryFetcher::new(self.asset_root.clone())),
        }
    }
}
