//! Certificate manager errors

use keel_common::CertificateId;
use std::path::PathBuf;
use thiserror::Error;

use super::CertificateType;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM input: {0}")]
    Pem(String),

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("certificate does not cover domain '{domain}'")]
    DomainMismatch { domain: String },

    #[error("invalid domain '{0}'")]
    InvalidDomain(String),

    #[error("certificate id '{0}' is not a valid path component")]
    InvalidId(CertificateId),

    #[error("certificate {0} not found")]
    NotFound(CertificateId),

    #[error("certificate {id} is {cert_type} and cannot be renewed automatically")]
    NotRenewable {
        id: CertificateId,
        cert_type: CertificateType,
    },

    #[error("certificate {0} has no contact email, cannot renew")]
    MissingEmail(CertificateId),

    #[error("an email address is required for ACME issuance")]
    EmailRequired,

    #[error("ACME issuance for {domain} failed: {message}")]
    Acme { domain: String, message: String },

    #[error("certificate registry {} is unreadable: {reason}", path.display())]
    Registry { path: PathBuf, reason: String },

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
}

impl CertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CertError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn acme(domain: &str, message: impl ToString) -> Self {
        CertError::Acme {
            domain: domain.to_string(),
            message: message.to_string(),
        }
    }
}
