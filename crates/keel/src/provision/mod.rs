//! Runtime binary provisioning.
//!
//! Makes sure every enabled runtime has its server binary on disk. Missing
//! binaries are resolved against a release listing or a static manifest,
//! downloaded, checksum-verified and installed atomically. Existing
//! binaries are never touched.

use keel_common::{spawn_job, JobHandle};
use keel_config::{BinarySource, ProvisioningConfig, RuntimeVersionSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

mod download;
mod error;
mod install;
mod platform;
mod source;

pub use download::{download, DownloadProgress, ProgressFn};
pub use error::ProvisionError;
pub use install::{install_binary, installed_version};
pub use platform::Platform;
pub use source::{select_target, DownloadTarget, RELEASE_BUNDLED_VERSION};

/// Resolves and installs runtime binaries
#[derive(Debug, Clone)]
pub struct Provisioner {
    client: reqwest::Client,
    config: ProvisioningConfig,
    platform: Platform,
}

impl Provisioner {
    pub fn new(config: ProvisioningConfig) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProvisionError::Client)?;

        Ok(Self {
            client,
            config,
            platform: Platform::detect()?,
        })
    }

    /// Override the detected platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Every binary the configured source offers for this platform
    pub async fn candidates(&self) -> Result<Vec<DownloadTarget>, ProvisionError> {
        match self.config.source {
            BinarySource::Github => {
                source::release_candidates(&self.client, &self.config.release_url, &self.platform)
                    .await
            }
            BinarySource::Manifest => {
                let url = self
                    .config
                    .manifest_url
                    .as_deref()
                    .ok_or(ProvisionError::MissingManifestUrl)?;
                source::manifest_candidates(&self.client, url, &self.platform).await
            }
        }
    }

    /// Pick the binary to install for `version`
    pub async fn resolve(&self, version: &str) -> Result<DownloadTarget, ProvisionError> {
        let candidates = self.candidates().await?;
        select_target(candidates, version).ok_or_else(|| ProvisionError::NoArtifact {
            platform: self.platform.to_string(),
        })
    }

    /// Resolve and download the binary for `version` into `dest`
    pub async fn install(
        &self,
        version: &str,
        dest: &Path,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<DownloadTarget, ProvisionError> {
        let target = self.resolve(version).await?;
        debug!(
            version,
            release = ?target.release,
            url = %target.url,
            "Resolved download target"
        );
        download(&self.client, &target, dest, progress).await?;
        Ok(target)
    }

    /// Install every missing binary among `specs`.
    ///
    /// Returns the versions that were installed. Stops at the first failure,
    /// which names the version.
    pub async fn ensure_binaries(
        &self,
        specs: &[RuntimeVersionSpec],
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<String>, ProvisionError> {
        let mut installed = Vec::new();

        for spec in specs {
            if spec.binary.exists() {
                debug!(version = %spec.version, binary = %spec.binary.display(), "Binary present");
                continue;
            }

            info!(version = %spec.version, binary = %spec.binary.display(), "Binary missing, provisioning");
            self.install(&spec.version, &spec.binary, progress)
                .await
                .map_err(|e| e.for_version(&spec.version))?;
            installed.push(spec.version.clone());
        }

        Ok(installed)
    }

    /// Run [`Provisioner::ensure_binaries`] on a detached task
    pub fn spawn_ensure(self: &Arc<Self>, specs: Vec<RuntimeVersionSpec>) -> JobHandle {
        let provisioner = Arc::clone(self);
        spawn_job("provision", move |job| async move {
            let report = move |p: DownloadProgress| {
                job.progress(p.percent(), Some(format!("downloading PHP {}", p.version)));
            };
            provisioner
                .ensure_binaries(&specs, Some(&report))
                .await
                .map(|_| ())
        })
    }
}
