//! KDL document to [`Config`](crate::Config).

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use tracing::{trace, warn};

use crate::model::*;
use crate::Config;

pub mod helpers;
mod sections;

use helpers::{get_first_arg_bool, get_first_arg_string};

const KNOWN_NODES: &[&str] = &[
    "dev-mode",
    "runtime-user",
    "transport",
    "admin-email",
    "paths",
    "proxy",
    "runtime",
    "provisioning",
    "certificates",
    "helper",
    "sites",
];

/// Build a configuration from a parsed document.
pub fn parse_document(doc: &::kdl::KdlDocument) -> Result<Config> {
    for node in doc.nodes() {
        let name = node.name().value();
        if !KNOWN_NODES.contains(&name) {
            warn!(node = %name, "Ignoring unknown configuration node");
        }
    }

    let top = |name: &str| top_level(doc, name);

    let dev_mode = top("dev-mode").and_then(get_first_arg_bool).unwrap_or(false);

    let path_defaults = if dev_mode {
        let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        PathsConfig::development(&cwd)
    } else {
        PathsConfig::production()
    };
    let paths = match top("paths") {
        Some(node) => sections::parse_paths(node, path_defaults),
        None => path_defaults,
    };

    let proxy = match top("proxy") {
        Some(node) => sections::parse_proxy(node, ProxyConfig::defaults(dev_mode))?,
        None => ProxyConfig::defaults(dev_mode),
    };

    let mut runtimes = Vec::new();
    for node in doc.nodes().iter().filter(|n| n.name().value() == "runtime") {
        runtimes.push(sections::parse_runtime(node)?);
    }
    let mut seen = HashSet::new();
    for runtime in &runtimes {
        if !seen.insert(runtime.version.clone()) {
            return Err(anyhow!("Runtime '{}' is declared more than once", runtime.version));
        }
    }

    let transport = match top("transport").and_then(get_first_arg_string) {
        Some(t) => t.parse::<Transport>().map_err(|e| anyhow!(e))?,
        None => Transport::default(),
    };

    let config = Config {
        dev_mode,
        runtime_user: top("runtime-user")
            .and_then(get_first_arg_string)
            .unwrap_or_else(|| "keel".to_string()),
        transport,
        admin_email: top("admin-email").and_then(get_first_arg_string),
        paths,
        proxy,
        runtimes,
        provisioning: top("provisioning")
            .map(sections::parse_provisioning)
            .transpose()?
            .unwrap_or_default(),
        certificates: top("certificates")
            .map(sections::parse_certificates)
            .transpose()?
            .unwrap_or_default(),
        helper: top("helper")
            .map(sections::parse_helper)
            .transpose()?
            .unwrap_or_default(),
        sites: top("sites").map(sections::parse_sites).unwrap_or_default(),
    };

    trace!(
        dev_mode = config.dev_mode,
        runtimes = config.runtimes.len(),
        "Parsed configuration document"
    );

    Ok(config)
}

fn top_level<'a>(doc: &'a ::kdl::KdlDocument, name: &str) -> Option<&'a ::kdl::KdlNode> {
    doc.nodes().iter().find(|n| n.name().value() == name)
}

#[cfg(test)]
mod tests {
    use crate::{BinarySource, Config, ConfigError, Transport};
    use std::path::PathBuf;

    #[test]
    fn test_full_document() {
        let config = Config::from_kdl(
            r#"
            dev-mode #true
            runtime-user "www"
            transport "unix"
            admin-email "ops@example.com"
            paths { data-dir "/srv/keel"; log-dir "/srv/log"; socket-dir "/srv/run" }
            proxy { http-port 8080; https-port 8443; admin-port 2999; binary "/opt/caddy" }
            runtime "8.3" { port 9183; admin-port 2183; num-threads 4; max-threads 16 }
            runtime "8.2" { enabled #false }
            provisioning { source "manifest"; manifest-url "https://cdn.test/manifest.json" }
            certificates { renew-before-days 20; provider "zerossl"; staging #true }
            helper { socket "/run/keel/helper.sock" }
            sites { file "/srv/keel/sites.json" }
            "#,
        )
        .unwrap();

        assert!(config.dev_mode);
        assert_eq!(config.runtime_user, "www");
        assert_eq!(config.transport, Transport::Unix);
        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/keel"));
        assert_eq!(config.proxy.admin_port, 2999);
        assert_eq!(config.proxy_binary(), Some(PathBuf::from("/opt/caddy")));

        let r83 = config.runtime("8.3").unwrap();
        assert_eq!((r83.port, r83.admin_port), (9183, 2183));
        assert_eq!((r83.num_threads, r83.max_threads), (4, 16));

        let r82 = config.runtime("8.2").unwrap();
        assert!(!r82.enabled);
        assert_eq!((r82.port, r82.admin_port), (9082, 2082));

        assert_eq!(config.provisioning.source, BinarySource::Manifest);
        assert_eq!(config.certificates.renew_before_days, 20);
        assert!(config.certificates.staging);
        assert_eq!(
            config.helper.socket,
            Some(PathBuf::from("/run/keel/helper.sock"))
        );
        assert_eq!(config.sites_file(), PathBuf::from("/srv/keel/sites.json"));
    }

    #[test]
    fn test_manifest_without_url_is_invalid() {
        let err = Config::from_kdl(r#"provisioning { source "manifest" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_runtime_without_version_is_invalid() {
        let err = Config::from_kdl("runtime { port 9000 }").unwrap_err();
        assert!(err.to_string().contains("version argument"));
    }

    #[test]
    fn test_unconventional_version_needs_ports() {
        let err = Config::from_kdl(r#"runtime "nightly" { admin-port 2100 }"#).unwrap_err();
        assert!(err.to_string().contains("'port'"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = Config::from_kdl("proxy { http-port ").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax(_)));
    }

    #[test]
    fn test_duplicate_runtime_block() {
        let err = Config::from_kdl(r#"runtime "8.4"; runtime "8.4""#).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
