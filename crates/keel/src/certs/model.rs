//! Certificate records as stored in the registry.

use chrono::{DateTime, Duration, Utc};
use keel_common::CertificateId;
use keel_config::AcmeProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::render::TlsMaterial;

/// How a certificate was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateType {
    #[serde(rename = "self-signed")]
    SelfSigned,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "acme", alias = "letsencrypt")]
    Acme,
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateType::SelfSigned => "self-signed",
            CertificateType::Custom => "custom",
            CertificateType::Acme => "acme",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Pending,
    Active,
    Expired,
    Failed,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateStatus::Pending => "pending",
            CertificateStatus::Active => "active",
            CertificateStatus::Expired => "expired",
            CertificateStatus::Failed => "failed",
        })
    }
}

/// One certificate and the files backing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub site_id: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub cert_type: CertificateType,
    pub status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AcmeProvider>,
    pub auto_renew: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_path: Option<PathBuf>,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub subject: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_renewed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    pub fn is_active(&self) -> bool {
        self.status == CertificateStatus::Active
    }

    /// Whole days until expiry, negative once expired
    /// Whether the proxy may keep serving this material.
    ///
    /// A failed renewal does not invalidate the certificate it was renewing.
    pub fn is_servable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CertificateStatus::Active => true,
            CertificateStatus::Failed => self.valid_until > now,
            CertificateStatus::Pending | CertificateStatus::Expired => false,
        }
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.valid_until - now).num_days()
    }

    /// True when `valid_until` falls before `now + days`
    pub fn expires_within(&self, days: u32, now: DateTime<Utc>) -> bool {
        self.valid_until < now + Duration::days(i64::from(days))
    }

    pub fn matches_domain(&self, domain: &str) -> bool {
        self.domain.trim().eq_ignore_ascii_case(domain.trim())
    }

    pub fn tls_material(&self) -> TlsMaterial {
        TlsMaterial {
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
        }
    }
}
