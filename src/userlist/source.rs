//! Retrieval of the template userlist from a URL or a local file.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Error, Result};

/// Where the template userlist lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Fetched with a plain HTTP GET.
    Remote(String),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl SourceLocation {
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocation::Remote(_))
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Remote(url) => f.write_str(url),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Raw byte retrieval for template documents.
///
/// Implementations do not retry or cache; any failure is reported as
/// [`Error::SourceUnavailable`].
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>>;
}

/// Fetches remote documents over HTTP(S) and local ones from disk.
#[derive(Debug, Clone)]
pub struct DefaultFileSource {
    client: Client,
}

impl DefaultFileSource {
    /// Creates a source with a default HTTP client.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Creates a source with a custom HTTP client (timeouts, proxies, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let unavailable = |reason: String| Error::SourceUnavailable {
            location: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(format!("failed to download userlist: {e}")))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| unavailable(format!("failed to read userlist body: {e}")))?;

        Ok(body.to_vec())
    }
}

impl Default for DefaultFileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSource for DefaultFileSource {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>> {
        tracing::debug!(%location, remote = location.is_remote(), "Fetching userlist template");
        match location {
            SourceLocation::Remote(url) => self.fetch_remote(url).await,
            SourceLocation::Local(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| Error::SourceUnavailable {
                        location: path.display().to_string(),
                        reason: format!("failed to read userlist: {e}"),
                    })
            }
        }
    }
}
