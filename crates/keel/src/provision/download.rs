//! Streaming download with checksum verification and atomic install.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use super::install::install_binary;
use super::{DownloadTarget, ProvisionError};

/// Progress of one download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub version: String,
    pub downloaded: u64,
    /// From the response length, else the declared size
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|t| *t > 0)
            .map(|t| (self.downloaded as f64 / t as f64 * 100.0).min(100.0))
    }
}

/// Progress callback
pub type ProgressFn<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// Fetch `target` into `dest`.
///
/// Bytes are streamed into a temp file beside `dest` and hashed on the way.
/// Nothing appears at `dest` unless the download completed and the checksum
/// (when known) matched; the temp file is removed on every failure path.
pub async fn download(
    client: &reqwest::Client,
    target: &DownloadTarget,
    dest: &Path,
    progress: Option<&ProgressFn<'_>>,
) -> Result<(), ProvisionError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".keel-download-")
        .tempfile_in(dir)
        .map_err(|e| ProvisionError::io(dir, e))?;

    let http_error = |source| ProvisionError::Http {
        url: target.url.clone(),
        source,
    };

    info!(url = %target.url, dest = %dest.display(), "Downloading runtime binary");
    let mut response = client.get(&target.url).send().await.map_err(http_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProvisionError::Status {
            url: target.url.clone(),
            status,
        });
    }

    let total = response.content_length().or(target.size);
    let mut hasher = Sha256::new();
    let mut downloaded = 0u64;

    while let Some(chunk) = response.chunk().await.map_err(http_error)? {
        tmp.write_all(&chunk)
            .map_err(|e| ProvisionError::io(tmp.path(), e))?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if let Some(report) = progress {
            report(DownloadProgress {
                version: target.version.clone(),
                downloaded,
                total,
            });
        }
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| ProvisionError::io(tmp.path(), e))?;

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = target.checksum.as_deref().filter(|c| !c.is_empty()) {
        if !expected.eq_ignore_ascii_case(&actual) {
            warn!(url = %target.url, expected, actual = %actual, "Checksum mismatch");
            return Err(ProvisionError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        debug!(sha256 = %actual, "Checksum verified");
    }

    set_executable(tmp.path())?;

    match tmp.persist(dest) {
        Ok(_) => {}
        Err(e) if is_cross_device(&e.error) => {
            debug!(dest = %dest.display(), "Rename crosses devices, copying instead");
            install_binary(e.file.path(), dest)?;
        }
        Err(e) => return Err(ProvisionError::io(dest, e.error)),
    }

    info!(dest = %dest.display(), bytes = downloaded, "Runtime binary installed");
    Ok(())
}

fn set_executable(path: &Path) -> Result<(), ProvisionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| ProvisionError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}
