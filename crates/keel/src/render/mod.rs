//! Caddyfile rendering.
//!
//! Rendering is pure: a [`RenderContext`] snapshot of sites, runtime specs,
//! certificate assignments and paths goes in, Caddyfile text comes out. The
//! orchestrator decides where the text is written and when it is pushed.
//!
//! Input is validated before any text is produced. A [`RenderError`] means
//! the site data itself is unusable, and the caller must not touch files or
//! processes.

use keel_common::Site;
use keel_config::{Config, PathsConfig, RuntimeVersionSpec, Transport};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod pages;
mod proxy;
mod runtime;

pub use proxy::render_proxy;
pub use runtime::render_runtime;

/// Site data that cannot be turned into configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("site '{site}' has an invalid hostname '{hostname}'")]
    InvalidHostname { site: String, hostname: String },

    #[error("hostname '{hostname}' is claimed by both site '{first}' and site '{second}'")]
    DuplicateHostname {
        hostname: String,
        first: String,
        second: String,
    },

    #[error("site '{site}' has an invalid environment variable name '{key}'")]
    InvalidEnvKey { site: String, key: String },

    #[error("site '{site}' environment variable '{key}' contains a line break")]
    InvalidEnvValue { site: String, key: String },

    #[error("site '{site}' has a document root that cannot be rendered: {path}")]
    InvalidPath { site: String, path: String },
}

/// Certificate and key files for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Something that knows which certificate the proxy should serve per domain
pub trait TlsSource: Send + Sync {
    /// Map of lowercased domain to certificate material
    fn tls_assignments(&self) -> HashMap<String, TlsMaterial>;
}

/// Source with no certificates; the proxy falls back to its own behaviour
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTls;

impl TlsSource for NoTls {
    fn tls_assignments(&self) -> HashMap<String, TlsMaterial> {
        HashMap::new()
    }
}

/// Everything a render needs, captured at one point in time
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub sites: Vec<Site>,
    pub runtimes: Vec<RuntimeVersionSpec>,
    /// Keyed by lowercased domain
    pub tls: HashMap<String, TlsMaterial>,
    pub paths: PathsConfig,
    pub transport: Transport,
    pub dev_mode: bool,
    pub admin_email: Option<String>,
    /// Where the proxy forwards HTTP-01 challenge requests, if anywhere
    pub acme_challenge_upstream: Option<String>,
    /// Worker-file probe; tests swap it out
    pub worker_exists: fn(&Path) -> bool,
}

impl RenderContext {
    pub fn new(config: &Config, sites: Vec<Site>) -> Self {
        Self {
            sites,
            runtimes: config.runtimes.clone(),
            tls: HashMap::new(),
            paths: config.paths.clone(),
            transport: config.transport,
            dev_mode: config.dev_mode,
            admin_email: config.admin_email.clone(),
            acme_challenge_upstream: challenge_upstream(config),
            worker_exists: Path::is_file,
        }
    }

    pub fn with_tls(mut self, tls: HashMap<String, TlsMaterial>) -> Self {
        self.tls = tls;
        self
    }

    /// Enabled runtime for a version
    pub fn enabled_runtime(&self, version: &str) -> Option<&RuntimeVersionSpec> {
        self.runtimes
            .iter()
            .find(|r| r.enabled && r.version == version)
    }

    /// Active sites served by `version`
    pub fn active_sites_for<'a>(&'a self, version: &'a str) -> impl Iterator<Item = &'a Site> + 'a {
        self.sites
            .iter()
            .filter(move |s| s.is_active() && s.runtime_version == version)
    }

    /// Number of active sites served by `version`
    pub fn site_count(&self, version: &str) -> usize {
        self.active_sites_for(version).count()
    }

    /// Check every active site before anything is rendered
    pub fn validate(&self) -> Result<(), RenderError> {
        let mut claimed: BTreeMap<String, &str> = BTreeMap::new();

        for site in self.sites.iter().filter(|s| s.is_active()) {
            for hostname in site.hostnames() {
                if !is_valid_hostname(hostname) {
                    return Err(RenderError::InvalidHostname {
                        site: site.id.clone(),
                        hostname: hostname.to_string(),
                    });
                }
                let key = hostname.to_ascii_lowercase();
                match claimed.get(&key) {
                    Some(first) if *first != site.id => {
                        return Err(RenderError::DuplicateHostname {
                            hostname: key,
                            first: first.to_string(),
                            second: site.id.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        claimed.insert(key, site.id.as_str());
                    }
                }
            }

            for (key, value) in &site.environment {
                if !is_valid_env_key(key) {
                    return Err(RenderError::InvalidEnvKey {
                        site: site.id.clone(),
                        key: key.clone(),
                    });
                }
                if value.contains(['\n', '\r']) {
                    return Err(RenderError::InvalidEnvValue {
                        site: site.id.clone(),
                        key: key.clone(),
                    });
                }
            }

            let root = site.document_root();
            let root = root.to_string_lossy();
            if root.contains(['\n', '\r', '{', '}', '"']) {
                return Err(RenderError::InvalidPath {
                    site: site.id.clone(),
                    path: root.into_owned(),
                });
            }
        }

        Ok(())
    }
}

/// Loopback address the proxy forwards challenges to.
///
/// Only set when the responder listens on its own port; when it shares the
/// proxy's HTTP port the two cannot run at the same time anyway.
fn challenge_upstream(config: &Config) -> Option<String> {
    let addr: SocketAddr = config.certificates.challenge_address.parse().ok()?;
    if addr.port() == config.proxy.http_port {
        return None;
    }
    let upstream = if addr.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    } else {
        addr
    };
    Some(upstream.to_string())
}

// ============================================================================
// Token helpers
// ============================================================================

/// DNS name, optionally with a leading `*.` wildcard label
pub fn is_valid_hostname(hostname: &str) -> bool {
    let name = hostname.strip_prefix("*.").unwrap_or(hostname);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

fn is_valid_env_key(key: &str) -> bool {
    let mut bytes = key.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Double-quoted Caddyfile token
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

/// Matcher name derived from a site id
fn matcher_name(site_id: &str) -> String {
    let cleaned: String = site_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("site_{cleaned}")
}

fn write_header(out: &mut String, title: &str) {
    let _ = writeln!(out, "# Keel {title}");
    let _ = writeln!(out, "# Generated file, local edits are overwritten");
    out.push('\n');
}

fn write_log_block(out: &mut String, indent: &str, path: &Path) {
    let _ = writeln!(out, "{indent}log {{");
    let _ = writeln!(out, "{indent}\toutput file {} {{", quote_path(path));
    let _ = writeln!(out, "{indent}\t\troll_size 100mb");
    let _ = writeln!(out, "{indent}\t\troll_keep 5");
    let _ = writeln!(out, "{indent}\t}}");
    let _ = writeln!(out, "{indent}\tformat json");
    let _ = writeln!(out, "{indent}}}");
}
