//! Release listings: where download candidates come from.

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Platform, ProvisionError};

/// Runtime version the official release binaries are built with
pub const RELEASE_BUNDLED_VERSION: &str = "8.4";

/// One downloadable binary
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadTarget {
    /// Runtime (PHP) version the binary embeds
    #[serde(alias = "php_version")]
    pub version: String,
    /// Release of the server binary itself
    #[serde(default, alias = "franken_version")]
    pub release: Option<String>,
    pub platform: String,
    pub url: String,
    /// Hex SHA-256 of the file
    #[serde(default)]
    pub checksum: Option<String>,
    /// Declared size in bytes
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    browser_download_url: String,
}

/// Candidates from a release-listing API (`tag_name` + `assets`)
pub async fn release_candidates(
    client: &reqwest::Client,
    url: &str,
    platform: &Platform,
) -> Result<Vec<DownloadTarget>, ProvisionError> {
    let release: Release = fetch_json(
        client
            .get(url)
            .header(ACCEPT, "application/vnd.github.v3+json"),
        url,
    )
    .await?;

    let platform = platform.to_string();
    let tag = release.tag_name.trim_start_matches('v').to_string();
    let targets: Vec<DownloadTarget> = release
        .assets
        .into_iter()
        .filter(|a| a.name.contains(&platform) && !a.name.contains("debug"))
        .map(|a| DownloadTarget {
            version: RELEASE_BUNDLED_VERSION.to_string(),
            release: Some(tag.clone()),
            platform: platform.clone(),
            url: a.browser_download_url,
            checksum: None,
            size: a.size,
        })
        .collect();

    debug!(url, release = %tag, candidates = targets.len(), "Fetched release listing");
    Ok(targets)
}

/// Candidates from a static JSON manifest, exact platform match only
pub async fn manifest_candidates(
    client: &reqwest::Client,
    url: &str,
    platform: &Platform,
) -> Result<Vec<DownloadTarget>, ProvisionError> {
    let all: Vec<DownloadTarget> = fetch_json(client.get(url), url).await?;
    let platform = platform.to_string();
    let targets: Vec<DownloadTarget> = all
        .into_iter()
        .filter(|t| t.platform == platform)
        .collect();

    debug!(url, candidates = targets.len(), "Fetched manifest");
    Ok(targets)
}

/// Prefer an exact version match, else the first candidate
pub fn select_target(candidates: Vec<DownloadTarget>, version: &str) -> Option<DownloadTarget> {
    if let Some(exact) = candidates.iter().position(|t| t.version == version) {
        return candidates.into_iter().nth(exact);
    }
    let fallback = candidates.into_iter().next()?;
    warn!(
        requested = version,
        available = %fallback.version,
        "No build for the requested version, using the first candidate"
    );
    Some(fallback)
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T, ProvisionError> {
    let response = request.send().await.map_err(|source| ProvisionError::Http {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProvisionError::Status {
            url: url.to_string(),
            status,
        });
    }

    let body = response.bytes().await.map_err(|source| ProvisionError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|e| ProvisionError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
