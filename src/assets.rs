//! Where ROM images, tape loaders and `open_url` targets come from

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use reqwest::blocking::Client;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches resources by location (a relative path or URL).
pub trait AssetSource: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Resources fetched over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpAssets {
    client: Client,
}

impl HttpAssets {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl AssetSource for HttpAssets {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        debug!("GET {}", location);
        let response = self
            .client
            .get(location)
            .send()
            .with_context(|| format!("requesting {}", location))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP status {}", location, status.as_u16());
        }
        let body = response
            .bytes()
            .with_context(|| format!("reading body of {}", location))?;
        Ok(body.to_vec())
    }
}

fn is_http(location: &str) -> bool {
    location.split_once("://").is_some_and(|(scheme, _)| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    })
}

/// Resources under a filesystem root. Relative locations resolve against the
/// root; `file://` URLs and absolute paths are read as-is, and `http(s)://`
/// URLs go to the HTTP client.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
    http: Option<HttpAssets>,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let http = match HttpAssets::new() {
            Ok(http) => Some(http),
            Err(e) => {
                warn!("HTTP assets unavailable: {:#}", e);
                None
            }
        };
        Self {
            root: root.into(),
            http,
        }
    }

    /// Use `http` for `http(s)://` locations.
    pub fn with_http(mut self, http: HttpAssets) -> Self {
        self.http = Some(http);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> Result<PathBuf> {
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = location.split_once("://") {
            bail!("unsupported URL scheme '{}'", scheme);
        }
        let path = Path::new(location);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

impl AssetSource for DirectoryAssets {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        if is_http(location) {
            let http = self
                .http
                .as_ref()
                .with_context(|| format!("no HTTP client for {}", location))?;
            return http.fetch(location);
        }
        let path = self.resolve(location)?;
        debug!("reading {}", path.display());
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Resources held in memory, keyed by location.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, data: Vec<u8>) {
        self.files.insert(location.into(), data);
    }

    pub fn with(mut self, location: impl Into<String>, data: Vec<u8>) -> Self {
        self.insert(location, data);
        self
    }
}

impl AssetSource for MemoryAssets {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        self.files
            .get(location)
            .cloned()
            .with_context(|| format!("no asset at {}", location))
    }
}
