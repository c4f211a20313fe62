//! Self-signed certificate generation.

use rand::RngCore;
use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber, PKCS_ECDSA_P256_SHA256};
use time::{Duration, OffsetDateTime};

use super::CertError;

/// Issuer recorded for generated certificates
pub const SELF_SIGNED_ISSUER: &str = "Keel Self-Signed";

const VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct GeneratedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// P-256 certificate for `domain` and `*.domain`, valid for one year
pub fn generate(domain: &str) -> Result<GeneratedCertificate, CertError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::new(vec![domain.to_string(), format!("*.{domain}")])?;
    params.distinguished_name.push(DnType::CommonName, domain);
    params
        .distinguished_name
        .push(DnType::OrganizationName, SELF_SIGNED_ISSUER);

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);
    params.serial_number = Some(SerialNumber::from(random_serial()));

    let cert = params.self_signed(&key_pair)?;
    Ok(GeneratedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// 128 random bits, kept positive
fn random_serial() -> Vec<u8> {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    bytes.to_vec()
}
