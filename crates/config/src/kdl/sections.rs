//! Per-block KDL parsing.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::trace;

use crate::model::*;

use super::helpers::{
    get_bool_entry, get_first_arg_string, get_port_entry, get_string_entry, get_u64_entry,
};

/// Parse the `paths` block on top of the mode's defaults
pub fn parse_paths(node: &::kdl::KdlNode, defaults: PathsConfig) -> PathsConfig {
    let paths = PathsConfig {
        data_dir: get_string_entry(node, "data-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir),
        log_dir: get_string_entry(node, "log-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir),
        socket_dir: get_string_entry(node, "socket-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_dir),
    };
    trace!(data_dir = %paths.data_dir.display(), "Parsed paths block");
    paths
}

/// Parse the `proxy` block
pub fn parse_proxy(node: &::kdl::KdlNode, defaults: ProxyConfig) -> Result<ProxyConfig> {
    Ok(ProxyConfig {
        http_port: get_port_entry(node, "http-port")?.unwrap_or(defaults.http_port),
        https_port: get_port_entry(node, "https-port")?.unwrap_or(defaults.https_port),
        admin_port: get_port_entry(node, "admin-port")?.unwrap_or(defaults.admin_port),
        binary: get_string_entry(node, "binary").map(PathBuf::from),
    })
}

/// Parse one `runtime "<version>" { ... }` block
pub fn parse_runtime(node: &::kdl::KdlNode) -> Result<RuntimeVersionSpec> {
    let version = get_first_arg_string(node).ok_or_else(|| {
        anyhow!("Runtime requires a version argument, e.g., runtime \"8.4\" {{ ... }}")
    })?;

    let binary = get_string_entry(node, "binary")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY_PATH));

    let conventional = RuntimeVersionSpec::with_conventional_ports(&version, binary.clone());

    let port = match get_port_entry(node, "port")? {
        Some(p) => p,
        None => conventional.as_ref().map(|c| c.port).ok_or_else(|| {
            anyhow!("Runtime '{}' requires a 'port' field, e.g., port 9084", version)
        })?,
    };
    let admin_port = match get_port_entry(node, "admin-port")? {
        Some(p) => p,
        None => conventional.as_ref().map(|c| c.admin_port).ok_or_else(|| {
            anyhow!(
                "Runtime '{}' requires an 'admin-port' field, e.g., admin-port 2084",
                version
            )
        })?,
    };

    let threads = |name: &str| -> Result<u32> {
        let v = get_u64_entry(node, name)?.unwrap_or(0);
        u32::try_from(v).map_err(|_| anyhow!("Runtime '{}' has an oversized '{}'", version, name))
    };

    let spec = RuntimeVersionSpec {
        port,
        admin_port,
        binary,
        enabled: get_bool_entry(node, "enabled").unwrap_or(true),
        num_threads: threads("num-threads")?,
        max_threads: threads("max-threads")?,
        version,
    };

    trace!(
        version = %spec.version,
        port = spec.port,
        admin_port = spec.admin_port,
        enabled = spec.enabled,
        "Parsed runtime"
    );

    Ok(spec)
}

/// Parse the `provisioning` block
pub fn parse_provisioning(node: &::kdl::KdlNode) -> Result<ProvisioningConfig> {
    let defaults = ProvisioningConfig::default();
    let source = match get_string_entry(node, "source") {
        Some(s) => s.parse::<BinarySource>().map_err(|e| anyhow!(e))?,
        None => defaults.source,
    };
    let config = ProvisioningConfig {
        source,
        release_url: get_string_entry(node, "release-url").unwrap_or(defaults.release_url),
        manifest_url: get_string_entry(node, "manifest-url"),
        timeout_secs: get_u64_entry(node, "timeout-secs")?.unwrap_or(defaults.timeout_secs),
    };

    if config.source == BinarySource::Manifest && config.manifest_url.is_none() {
        return Err(anyhow!(
            "Provisioning source 'manifest' requires a 'manifest-url' field"
        ));
    }

    Ok(config)
}

/// Parse the `certificates` block
pub fn parse_certificates(node: &::kdl::KdlNode) -> Result<CertificatesConfig> {
    let defaults = CertificatesConfig::default();
    let provider = match get_string_entry(node, "provider") {
        Some(p) => p.parse::<AcmeProvider>().map_err(|e| anyhow!(e))?,
        None => defaults.provider,
    };
    let renew_before_days = match get_u64_entry(node, "renew-before-days")? {
        Some(v) => u32::try_from(v).map_err(|_| anyhow!("'renew-before-days' is too large"))?,
        None => defaults.renew_before_days,
    };

    Ok(CertificatesConfig {
        renew_before_days,
        provider,
        staging: get_bool_entry(node, "staging").unwrap_or(defaults.staging),
        challenge_address: get_string_entry(node, "challenge-address")
            .unwrap_or(defaults.challenge_address),
        check_interval_hours: get_u64_entry(node, "check-interval-hours")?
            .unwrap_or(defaults.check_interval_hours),
    })
}

/// Parse the `helper` block
pub fn parse_helper(node: &::kdl::KdlNode) -> Result<HelperConfig> {
    let defaults = HelperConfig::default();
    Ok(HelperConfig {
        socket: get_string_entry(node, "socket").map(PathBuf::from),
        timeout_secs: get_u64_entry(node, "timeout-secs")?.unwrap_or(defaults.timeout_secs),
    })
}

/// Parse the `sites` block
pub fn parse_sites(node: &::kdl::KdlNode) -> SitesConfig {
    SitesConfig {
        file: get_string_entry(node, "file").map(PathBuf::from),
    }
}
