//! Certificate lifecycle management.
//!
//! Self-signed, operator-supplied and ACME-issued certificates are tracked in
//! one JSON registry, with their PEM files under a per-certificate directory.
//! The [`CertificateManager`] is the only writer of both.

pub mod acme;
mod error;
mod inspect;
mod manager;
mod model;
mod registry;
mod scheduler;
mod self_signed;
mod storage;

pub use acme::{AcmeAuthority, CertificateAuthority, IssueRequest, IssuedCertificate};
pub use error::CertError;
pub use inspect::{inspect_certificate, CertificateInfo};
pub use manager::{CertificateManager, RenewOutcome, RenewalReport};
pub use model::{Certificate, CertificateStatus, CertificateType};
pub use scheduler::{RenewalScheduler, DEFAULT_CHECK_INTERVAL, MIN_CHECK_INTERVAL};
pub use self_signed::SELF_SIGNED_ISSUER;
