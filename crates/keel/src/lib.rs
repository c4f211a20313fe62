//! Keel control core.
//!
//! Keeps a fleet of versioned FrankenPHP runtimes and one edge Caddy proxy
//! running and correctly configured, provisions their binaries, and manages
//! the TLS certificates the proxy serves.
//!
//! # Components
//!
//! - [`render`]: pure Caddyfile rendering from sites, runtimes and certificates
//! - [`orchestrator`]: process supervision, start/stop/restart/reload
//! - [`control`]: client for each process's local control API
//! - [`provision`]: binary download, checksum verification and install
//! - [`certs`]: self-signed, custom and ACME certificates, renewal sweep
//! - [`sites`]: read-only site sources
//! - [`reload`]: signal bridging and reload coalescing for the binary

pub mod certs;
pub mod control;
mod fs;
pub mod orchestrator;
pub mod provision;
pub mod reload;
pub mod render;
pub mod sites;

pub use certs::{CertError, CertificateManager};
pub use control::{ControlClient, ControlEndpoint, ControlError};
pub use orchestrator::{InstanceInfo, Orchestrator, OrchestratorError, ProxyInfo};
pub use provision::{ProvisionError, Provisioner};
pub use render::{RenderContext, RenderError, TlsMaterial, TlsSource};
pub use sites::{JsonSiteFile, SiteSource, SiteSourceError, StaticSites};
