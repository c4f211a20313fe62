//! Domain types shared across the control core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Sites
// ============================================================================

/// Lifecycle state of a hosted site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Suspended,
    #[default]
    Pending,
}

/// A hosted site as seen by the control core.
///
/// Sites are owned by the surrounding product and are read-only here: the
/// renderer turns them into runtime and proxy configuration, the certificate
/// manager keys certificates by their domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Runtime version this site is served by (e.g. "8.4")
    pub runtime_version: String,
    /// Site home directory
    pub root_path: PathBuf,
    /// Document root relative to `root_path`
    #[serde(default = "default_public_path")]
    pub public_path: String,
    #[serde(default)]
    pub worker_mode: bool,
    /// Worker script, absolute or relative to the document root
    #[serde(default)]
    pub worker_file: Option<String>,
    #[serde(default)]
    pub worker_num: Option<u32>,
    #[serde(default)]
    pub status: SiteStatus,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_public_path() -> String {
    "public".to_string()
}

impl Site {
    /// Whether the site should be routed at all
    pub fn is_active(&self) -> bool {
        self.status == SiteStatus::Active
    }

    /// Primary domain followed by aliases, empty entries dropped
    pub fn hostnames(&self) -> Vec<&str> {
        std::iter::once(self.domain.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect()
    }

    /// Absolute document root
    pub fn document_root(&self) -> PathBuf {
        let public = self.public_path.trim_matches('/');
        if public.is_empty() {
            self.root_path.clone()
        } else {
            self.root_path.join(public)
        }
    }

    /// Absolute worker script path, when worker mode is on and a file is set
    pub fn worker_path(&self) -> Option<PathBuf> {
        if !self.worker_mode {
            return None;
        }
        let file = Path::new(self.worker_file.as_deref().unwrap_or("index.php"));
        if file.is_absolute() {
            return Some(file.to_path_buf());
        }
        Some(self.document_root().join(file))
    }
}

// ============================================================================
// Instances
// ============================================================================

/// Status of a supervised runtime or proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
        };
        f.write_str(s)
    }
}
