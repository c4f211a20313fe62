//! Configuration for the Keel hosting control core.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! runtime-user "keel"
//! admin-email "ops@example.com"
//! paths { data-dir "/var/lib/keel"; log-dir "/var/log/keel"; socket-dir "/var/run/keel" }
//! proxy { http-port 80; https-port 443; admin-port 2019 }
//! runtime "8.4" { port 9084; admin-port 2084; binary "/usr/local/bin/frankenphp" }
//! ```
//!
//! Loading is a three step affair: parse ([`Config::from_file`] or
//! [`Config::from_kdl`]), apply `KEEL_*` environment overrides
//! ([`Config::apply_env_overrides`]), then [`Config::validate`].

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

pub mod kdl;
mod model;
pub mod validate;

pub use model::*;
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

// ============================================================================
// Environment
// ============================================================================

pub const ENV_CONFIG: &str = "KEEL_CONFIG";
pub const ENV_DEV: &str = "KEEL_DEV";
pub const ENV_DATA_DIR: &str = "KEEL_DATA_DIR";
pub const ENV_LOG_DIR: &str = "KEEL_LOG_DIR";
pub const ENV_SOCKET_DIR: &str = "KEEL_SOCKET_DIR";
pub const ENV_BINARY: &str = "KEEL_BINARY";
pub const ENV_HTTP_PORT: &str = "KEEL_HTTP_PORT";
pub const ENV_HTTPS_PORT: &str = "KEEL_HTTPS_PORT";
/// Set to `root` to keep runtimes running as root
pub const ENV_RUNTIME_USER: &str = "KEEL_RUNTIME_USER";

const DEFAULT_CONFIG: &str = include_str!("default_config.kdl");

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    #[diagnostic(code(keel::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] ::kdl::KdlError),

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(keel::config::invalid))]
    Invalid(String),

    #[error("configuration failed validation: {0}")]
    #[diagnostic(code(keel::config::validation))]
    Validation(#[from] validator::ValidationErrors),

    #[error("configuration rejected: {}", .0.join("; "))]
    #[diagnostic(code(keel::config::rejected))]
    Rejected(Vec<String>),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Config
// ============================================================================

/// Complete control core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Development mode: unprivileged ports, no automatic HTTPS, local paths
    pub dev_mode: bool,
    /// Low-privilege account runtimes run as
    pub runtime_user: String,
    pub transport: Transport,
    /// Contact for ACME registration and the proxy's global options
    #[validate(email(message = "admin-email is not a valid email address"))]
    pub admin_email: Option<String>,
    pub paths: PathsConfig,
    #[validate(nested)]
    pub proxy: ProxyConfig,
    #[validate(nested)]
    pub runtimes: Vec<RuntimeVersionSpec>,
    #[validate(nested)]
    pub provisioning: ProvisioningConfig,
    #[validate(nested)]
    pub certificates: CertificatesConfig,
    pub helper: HelperConfig,
    pub sites: SitesConfig,
}

impl Config {
    /// Load a KDL configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_kdl(&content)?;
        info!(
            path = %path.display(),
            runtimes = config.runtimes.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration text.
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse()?;
        kdl::parse_document(&doc).map_err(|e| ConfigError::Invalid(format!("{e:#}")))
    }

    /// Built-in configuration used when no file is given.
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG)
    }

    /// Resolve the configuration from an explicit path, `KEEL_CONFIG`, or the
    /// embedded default, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using embedded defaults");
                Self::default_embedded()?
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `KEEL_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_DEV).as_deref() == Some("1") && !self.dev_mode {
            self.dev_mode = true;
            // Only production defaults are swapped out; explicit paths stay
            if self.paths == PathsConfig::production() {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                self.paths = PathsConfig::development(&cwd);
            }
            let prod = ProxyConfig::defaults(false);
            if self.proxy.http_port == prod.http_port && self.proxy.https_port == prod.https_port {
                let dev = ProxyConfig::defaults(true);
                self.proxy.http_port = dev.http_port;
                self.proxy.https_port = dev.https_port;
            }
        }

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.paths.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_SOCKET_DIR) {
            self.paths.socket_dir = PathBuf::from(dir);
        }
        if let Some(binary) = lookup(ENV_BINARY) {
            for runtime in &mut self.runtimes {
                runtime.binary = PathBuf::from(&binary);
            }
        }
        if let Some(port) = lookup(ENV_HTTP_PORT).and_then(|p| p.parse().ok()) {
            self.proxy.http_port = port;
        }
        if let Some(port) = lookup(ENV_HTTPS_PORT).and_then(|p| p.parse().ok()) {
            self.proxy.https_port = port;
        }
    }

    /// Schema and structural validation.
    ///
    /// Rejects duplicate versions and ports claimed twice. Softer findings
    /// live in [`validate::validate_config`].
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;

        let mut problems = Vec::new();

        let mut versions = HashSet::new();
        for runtime in &self.runtimes {
            if !versions.insert(runtime.version.as_str()) {
                problems.push(format!("runtime '{}' is declared twice", runtime.version));
            }
        }

        let mut owners: HashMap<u16, String> = HashMap::new();
        for (port, owner) in self.claimed_ports() {
            if let Some(previous) = owners.insert(port, owner.clone()) {
                problems.push(format!(
                    "port {port} is used by both {previous} and {owner}"
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Rejected(problems))
        }
    }

    /// Every port the proxy and enabled runtimes bind, with a label.
    pub fn claimed_ports(&self) -> Vec<(u16, String)> {
        let mut ports = vec![
            (self.proxy.http_port, "proxy http-port".to_string()),
            (self.proxy.https_port, "proxy https-port".to_string()),
            (self.proxy.admin_port, "proxy admin-port".to_string()),
        ];
        for runtime in self.enabled_runtimes() {
            ports.push((runtime.port, format!("runtime {} port", runtime.version)));
            ports.push((
                runtime.admin_port,
                format!("runtime {} admin-port", runtime.version),
            ));
        }
        ports
    }

    pub fn enabled_runtimes(&self) -> impl Iterator<Item = &RuntimeVersionSpec> {
        self.runtimes.iter().filter(|r| r.enabled)
    }

    pub fn runtime(&self, version: &str) -> Option<&RuntimeVersionSpec> {
        self.runtimes.iter().find(|r| r.version == version)
    }

    /// Binary the proxy is launched from.
    pub fn proxy_binary(&self) -> Option<PathBuf> {
        self.proxy
            .binary
            .clone()
            .or_else(|| self.enabled_runtimes().next().map(|r| r.binary.clone()))
    }

    pub fn sites_file(&self) -> PathBuf {
        self.sites
            .file
            .clone()
            .unwrap_or_else(|| self.paths.default_sites_file())
    }
}
