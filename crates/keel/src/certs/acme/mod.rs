//! ACME issuance.
//!
//! The certificate manager talks to a [`CertificateAuthority`]; production
//! uses [`AcmeAuthority`], which drives an HTTP-01 order with instant-acme
//! and answers the challenge from a temporary [`ChallengeResponder`].

use async_trait::async_trait;
use keel_config::AcmeProvider;

mod account;
mod authority;
mod challenge;

pub use account::AccountStore;
pub use authority::AcmeAuthority;
pub use challenge::{ChallengeResponder, ChallengeStore, ACME_CHALLENGE_PREFIX};

use super::CertError;

/// What to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub domain: String,
    pub email: String,
    pub provider: AcmeProvider,
    pub staging: bool,
}

/// What came back
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Leaf first, then intermediates
    pub cert_chain_pem: String,
    pub key_pem: String,
}

/// Obtains domain-validated certificates
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, CertError>;
}
