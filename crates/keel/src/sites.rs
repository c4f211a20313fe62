//! Read-only site sources.
//!
//! The control core never edits sites. It asks a [`SiteSource`] for the
//! current list whenever it renders configuration.

use async_trait::async_trait;
use keel_common::Site;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SiteSourceError {
    #[error("failed to read sites from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid site list in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Provides the current set of sites
#[async_trait]
pub trait SiteSource: Send + Sync {
    async fn sites(&self) -> Result<Vec<Site>, SiteSourceError>;
}

/// Fixed, in-memory site list
#[derive(Debug, Default)]
pub struct StaticSites {
    sites: RwLock<Vec<Site>>,
}

impl StaticSites {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites: RwLock::new(sites),
        }
    }

    /// Swap the list; takes effect on the next render
    pub fn replace(&self, sites: Vec<Site>) {
        *self.sites.write() = sites;
    }
}

#[async_trait]
impl SiteSource for StaticSites {
    async fn sites(&self) -> Result<Vec<Site>, SiteSourceError> {
        Ok(self.sites.read().clone())
    }
}

/// Sites read from a JSON array on every call.
///
/// A missing file means no sites yet.
#[derive(Debug, Clone)]
pub struct JsonSiteFile {
    path: PathBuf,
}

impl JsonSiteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SiteSource for JsonSiteFile {
    async fn sites(&self) -> Result<Vec<Site>, SiteSourceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Sites file absent, no sites configured");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(SiteSourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| SiteSourceError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}
