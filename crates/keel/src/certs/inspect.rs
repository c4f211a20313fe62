//! PEM and X.509 inspection for supplied and issued certificates.

use chrono::{DateTime, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::X509Certificate;

use super::CertError;

/// Facts read from a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    /// Issuer common name, else the full distinguished name
    pub issuer: String,
    /// Subject common name, else the full distinguished name
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Certificates found in the PEM input, leaf included
    pub chain_len: usize,
}

impl CertificateInfo {
    /// Whether this certificate is valid for `domain`.
    ///
    /// Matches a SAN exactly, a SAN of `*.domain`, a wildcard SAN covering
    /// `domain`, and finally the common name.
    pub fn covers(&self, domain: &str) -> bool {
        let domain = domain.trim().trim_end_matches('.');
        let apex_wildcard = format!("*.{domain}");

        let by_san = self.dns_names.iter().any(|name| {
            name.eq_ignore_ascii_case(domain)
                || name.eq_ignore_ascii_case(&apex_wildcard)
                || wildcard_matches(name, domain)
        });

        by_san
            || self
                .common_name
                .as_deref()
                .is_some_and(|cn| cn.eq_ignore_ascii_case(domain))
    }
}

/// `*.example.com` covers `shop.example.com` but not `example.com` or `a.b.example.com`
fn wildcard_matches(pattern: &str, domain: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };
    match domain.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
        None => false,
    }
}

/// Every CERTIFICATE block in `text`, in order
pub fn certificate_blocks(text: &str) -> Result<Vec<pem::Pem>, CertError> {
    let blocks: Vec<_> = pem::parse_many(text)
        .map_err(|e| CertError::Pem(e.to_string()))?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .collect();

    if blocks.is_empty() {
        return Err(CertError::Pem("no CERTIFICATE block found".to_string()));
    }
    Ok(blocks)
}

/// Parse the first certificate in `text`
pub fn inspect_certificate(text: &str) -> Result<CertificateInfo, CertError> {
    let blocks = certificate_blocks(text)?;
    let leaf = &blocks[0];
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| CertError::X509(e.to_string()))?;

    let common_name = first_common_name(&cert, false);
    let issuer = first_common_name(&cert, true).unwrap_or_else(|| cert.issuer().to_string());
    let subject = common_name
        .clone()
        .unwrap_or_else(|| cert.subject().to_string());

    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return Err(CertError::X509(e.to_string())),
    };

    let validity = cert.validity();
    Ok(CertificateInfo {
        common_name,
        dns_names,
        issuer,
        subject,
        not_before: timestamp(validity.not_before.timestamp())?,
        not_after: timestamp(validity.not_after.timestamp())?,
        chain_len: blocks.len(),
    })
}

/// Split a PEM bundle into the leaf and whatever certificates follow it
pub fn split_leaf(text: &str) -> (String, Option<String>) {
    const END: &str = "-----END CERTIFICATE-----";
    match text.find(END) {
        Some(at) => {
            let (leaf, rest) = text.split_at(at + END.len());
            let rest = rest.trim_start();
            let chain = rest
                .contains("-----BEGIN CERTIFICATE-----")
                .then(|| rest.to_string());
            (format!("{leaf}\n"), chain)
        }
        None => (text.to_string(), None),
    }
}

/// Check that `text` holds a PEM private key
pub fn check_private_key(text: &str) -> Result<(), CertError> {
    let blocks = pem::parse_many(text).map_err(|e| CertError::Pem(e.to_string()))?;
    if blocks.iter().any(|p| p.tag().ends_with("PRIVATE KEY")) {
        Ok(())
    } else {
        Err(CertError::Pem("no PRIVATE KEY block found".to_string()))
    }
}

fn first_common_name(cert: &X509Certificate<'_>, issuer: bool) -> Option<String> {
    let name = if issuer { cert.issuer() } else { cert.subject() };
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CertError::X509(format!("validity timestamp {secs} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::self_signed::generate;

    fn info(names: &[&str], cn: Option<&str>) -> CertificateInfo {
        CertificateInfo {
            common_name: cn.map(str::to_string),
            dns_names: names.iter().map(|s| s.to_string()).collect(),
            issuer: "CA".into(),
            subject: "S".into(),
            not_before: Utc::now(),
            not_after: Utc::now(),
            chain_len: 1,
        }
    }

    #[test]
    fn test_coverage_rules() {
        assert!(info(&["Shop.Test"], None).covers("shop.test"));
        assert!(info(&["*.shop.test"], None).covers("shop.test"));
        assert!(info(&["*.example.com"], None).covers("api.example.com"));
        assert!(!info(&["*.example.com"], None).covers("a.b.example.com"));
        assert!(info(&[], Some("shop.test")).covers("SHOP.test"));
        assert!(!info(&["other.test"], Some("other.test")).covers("shop.test"));
    }

    #[test]
    fn test_inspect_generated_certificate() {
        let generated = generate("shop.test").unwrap();
        let info = inspect_certificate(&generated.cert_pem).unwrap();

        assert_eq!(info.common_name.as_deref(), Some("shop.test"));
        assert!(info.dns_names.contains(&"shop.test".to_string()));
        assert!(info.dns_names.contains(&"*.shop.test".to_string()));
        assert!(info.not_before <= info.not_after);
        assert_eq!(info.chain_len, 1);
        assert!(check_private_key(&generated.key_pem).is_ok());
    }

    #[test]
    fn test_split_leaf() {
        let a = generate("a.test").unwrap().cert_pem;
        let b = generate("b.test").unwrap().cert_pem;

        let (leaf, chain) = split_leaf(&format!("{a}{b}"));
        assert_eq!(leaf.trim(), a.trim());
        assert_eq!(chain.as_deref().map(str::trim), Some(b.trim()));

        let (only, none) = split_leaf(&a);
        assert_eq!(only.trim(), a.trim());
        assert!(none.is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            inspect_certificate("not a pem"),
            Err(CertError::Pem(_))
        ));
        assert!(check_private_key("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }
}
