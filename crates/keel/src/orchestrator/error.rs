//! Orchestrator errors

use std::path::PathBuf;
use thiserror::Error;

use crate::control::ControlError;
use crate::provision::ProvisionError;
use crate::render::RenderError;
use crate::sites::SiteSourceError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("runtime '{0}' is not configured or not enabled")]
    UnknownVersion(String),

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("invalid site configuration: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Sites(#[from] SiteSourceError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no proxy binary: set proxy.binary or enable a runtime")]
    NoProxyBinary,

    #[error("control API of {target} rejected the request: {source}")]
    Control {
        target: String,
        #[source]
        source: ControlError,
    },

    #[error("runtime account '{username}' is unusable: {reason}")]
    Account { username: String, reason: String },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Config(#[from] keel_config::ConfigError),

    #[error("{} operation(s) failed: {}", .0.len(), summarize(.0))]
    Partial(Vec<(String, String)>),
}

impl OrchestratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OrchestratorError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn control(target: impl Into<String>, source: ControlError) -> Self {
        OrchestratorError::Control {
            target: target.into(),
            source,
        }
    }

    /// Collapse per-item failures; `Ok` when there were none
    pub(crate) fn from_failures(failures: Vec<(String, String)>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Partial(failures))
        }
    }
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(target, error)| format!("{target}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}
