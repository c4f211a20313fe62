//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use validator::Validate;

/// Default FrankenPHP binary location for production installs.
pub const DEFAULT_BINARY_PATH: &str = "/usr/local/bin/frankenphp";

// ============================================================================
// Runtimes
// ============================================================================

/// One configured PHP runtime version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RuntimeVersionSpec {
    #[validate(length(min = 1, message = "runtime version must not be empty"))]
    pub version: String,
    /// Loopback port the runtime serves sites on
    #[validate(range(min = 1, message = "runtime port must be non-zero"))]
    pub port: u16,
    /// Control API port
    #[validate(range(min = 1, message = "runtime admin port must be non-zero"))]
    pub admin_port: u16,
    pub binary: PathBuf,
    pub enabled: bool,
    /// PHP threads to start with (0 = automatic)
    pub num_threads: u32,
    /// Upper bound for PHP threads (0 = automatic)
    pub max_threads: u32,
}

impl RuntimeVersionSpec {
    /// Conventional ports for a version: 8.4 -> 9084 / 2084.
    pub fn with_conventional_ports(version: &str, binary: PathBuf) -> Option<Self> {
        let (major, minor) = version.split_once('.')?;
        let major: u16 = major.parse().ok()?;
        let minor: u16 = minor.parse().ok()?;
        if minor > 9 {
            return None;
        }
        let suffix = major.checked_mul(10)?.checked_add(minor)?;
        Some(Self {
            version: version.to_string(),
            port: 9000 + suffix,
            admin_port: 2000 + suffix,
            binary,
            enabled: true,
            num_threads: 0,
            max_threads: 0,
        })
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Filesystem roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub socket_dir: PathBuf,
}

impl PathsConfig {
    pub fn production() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/keel"),
            log_dir: PathBuf::from("/var/log/keel"),
            socket_dir: PathBuf::from("/var/run/keel"),
        }
    }

    /// Everything under `<base>/.keel`
    pub fn development(base: &Path) -> Self {
        let root = base.join(".keel");
        Self {
            data_dir: root.join("data"),
            log_dir: root.join("logs"),
            socket_dir: root.join("run"),
        }
    }

    /// Generated Caddyfiles
    pub fn caddy_dir(&self) -> PathBuf {
        self.data_dir.join("caddy")
    }

    /// PID files
    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }

    pub fn runtime_config_file(&self, version: &str) -> PathBuf {
        self.caddy_dir().join(format!("Caddyfile.php-{version}"))
    }

    pub fn proxy_config_file(&self) -> PathBuf {
        self.caddy_dir().join("Caddyfile.proxy")
    }

    pub fn runtime_pid_file(&self, version: &str) -> PathBuf {
        self.run_dir().join(format!("php-{version}.pid"))
    }

    pub fn proxy_pid_file(&self) -> PathBuf {
        self.run_dir().join("proxy.pid")
    }

    pub fn runtime_log_dir(&self, version: &str) -> PathBuf {
        self.log_dir.join(format!("php-{version}"))
    }

    pub fn runtime_socket(&self, version: &str) -> PathBuf {
        self.socket_dir.join(format!("php-{version}.sock"))
    }

    pub fn runtime_admin_socket(&self, version: &str) -> PathBuf {
        self.socket_dir.join(format!("php-{version}-admin.sock"))
    }

    pub fn proxy_admin_socket(&self) -> PathBuf {
        self.socket_dir.join("proxy-admin.sock")
    }

    pub fn certificates_dir(&self) -> PathBuf {
        self.data_dir.join("certificates")
    }

    pub fn certificate_registry(&self) -> PathBuf {
        self.data_dir.join("certificates.json")
    }

    pub fn acme_accounts_dir(&self) -> PathBuf {
        self.data_dir.join("acme-accounts")
    }

    pub fn default_sites_file(&self) -> PathBuf {
        self.data_dir.join("sites.json")
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// Edge proxy listeners and control port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProxyConfig {
    #[validate(range(min = 1, message = "proxy HTTP port must be non-zero"))]
    pub http_port: u16,
    #[validate(range(min = 1, message = "proxy HTTPS port must be non-zero"))]
    pub https_port: u16,
    #[validate(range(min = 1, message = "proxy admin port must be non-zero"))]
    pub admin_port: u16,
    /// Defaults to the first enabled runtime's binary
    pub binary: Option<PathBuf>,
}

impl ProxyConfig {
    pub fn defaults(dev_mode: bool) -> Self {
        let (http_port, https_port) = if dev_mode { (8000, 8443) } else { (80, 443) };
        Self {
            http_port,
            https_port,
            admin_port: 2019,
            binary: None,
        }
    }
}

/// How runtimes are reached by the proxy and how control APIs are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Loopback TCP ports
    #[default]
    Tcp,
    /// Unix sockets under the socket directory
    Unix,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "unix" => Ok(Transport::Unix),
            other => Err(format!(
                "invalid transport '{other}'. Valid transports: tcp, unix"
            )),
        }
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// Where runtime binaries are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BinarySource {
    /// Latest release from a release-listing API
    #[default]
    Github,
    /// Static JSON manifest on a CDN
    Manifest,
}

impl FromStr for BinarySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "release" => Ok(BinarySource::Github),
            "manifest" | "cdn" => Ok(BinarySource::Manifest),
            other => Err(format!(
                "invalid binary source '{other}'. Valid sources: github, manifest"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProvisioningConfig {
    pub source: BinarySource,
    #[validate(length(min = 1))]
    pub release_url: String,
    pub manifest_url: Option<String>,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            source: BinarySource::Github,
            release_url: "https://api.github.com/repos/php/frankenphp/releases/latest".to_string(),
            manifest_url: None,
            timeout_secs: 30 * 60,
        }
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// ACME certificate authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcmeProvider {
    #[default]
    LetsEncrypt,
    ZeroSsl,
}

impl AcmeProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcmeProvider::LetsEncrypt => "letsencrypt",
            AcmeProvider::ZeroSsl => "zerossl",
        }
    }

    /// ACME directory URL
    pub fn directory_url(&self, staging: bool) -> &'static str {
        match (self, staging) {
            (AcmeProvider::LetsEncrypt, false) => {
                "https://acme-v02.api.letsencrypt.org/directory"
            }
            (AcmeProvider::LetsEncrypt, true) => {
                "https://acme-staging-v02.api.letsencrypt.org/directory"
            }
            // ZeroSSL has no staging environment
            (AcmeProvider::ZeroSsl, _) => "https://acme.zerossl.com/v2/DV90",
        }
    }
}

impl fmt::Display for AcmeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcmeProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "letsencrypt" | "lets-encrypt" | "le" => Ok(AcmeProvider::LetsEncrypt),
            "zerossl" => Ok(AcmeProvider::ZeroSsl),
            other => Err(format!(
                "invalid ACME provider '{other}'. Valid providers: letsencrypt, zerossl"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CertificatesConfig {
    /// Renew ACME certificates with this many days or fewer left
    #[validate(range(min = 1, max = 89, message = "renewal window must be 1-89 days"))]
    pub renew_before_days: u32,
    pub provider: AcmeProvider,
    pub staging: bool,
    /// Bind address for the HTTP-01 responder
    pub challenge_address: String,
    #[validate(range(min = 1, message = "renewal check interval must be at least one hour"))]
    pub check_interval_hours: u64,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            renew_before_days: 30,
            provider: AcmeProvider::LetsEncrypt,
            staging: false,
            challenge_address: "0.0.0.0:80".to_string(),
            check_interval_hours: 12,
        }
    }
}

// ============================================================================
// Helper and sites
// ============================================================================

/// Privileged helper endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Unix socket; no helper is used when unset
    pub socket: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: 30,
        }
    }
}

/// Site data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SitesConfig {
    /// JSON file with an array of sites; `<data-dir>/sites.json` when unset
    pub file: Option<PathBuf>,
}
