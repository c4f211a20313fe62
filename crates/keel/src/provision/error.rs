//! Provisioning errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid release metadata from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("no {platform} build available")]
    NoArtifact { platform: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("no manifest URL configured for manifest binary source")]
    MissingManifestUrl,

    #[error("failed to provision PHP {version}: {source}")]
    Version {
        version: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn for_version(self, version: &str) -> Self {
        ProvisionError::Version {
            version: version.to_string(),
            source: Box::new(self),
        }
    }
}
