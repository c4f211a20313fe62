//! Certificate settings validation
//!
//! Checks the ACME challenge listener and renewal settings.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::net::SocketAddr;

/// Validate the `certificates` block against the rest of the configuration
pub fn validate_certificate_settings(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let certs = &config.certificates;

    match certs.challenge_address.parse::<SocketAddr>() {
        Ok(addr) => {
            if addr.port() == config.proxy.http_port && !addr.ip().is_loopback() {
                result.add_warning(ValidationWarning::new(format!(
                    "challenge-address {} shares the proxy HTTP port; ACME issuance only \
                     works while the proxy is stopped. Use a loopback port so the proxy \
                     forwards challenges",
                    addr
                )));
            }
        }
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                format!(
                    "challenge-address '{}' is not a socket address: {}",
                    certs.challenge_address, e
                ),
            ));
        }
    }

    if certs.check_interval_hours > 24 * 7 {
        result.add_warning(ValidationWarning::new(format!(
            "Certificates are only checked every {} hours; renewals may be late",
            certs.check_interval_hours
        )));
    }

    if u64::from(certs.renew_before_days) * 24 < certs.check_interval_hours {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            "renew-before-days is shorter than check-interval-hours; certificates could expire between checks",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_challenge_address() {
        let mut config = Config::default_embedded().unwrap();
        config.certificates.challenge_address = "port eighty".into();

        let result = validate_certificate_settings(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Certificate);
    }

    #[test]
    fn test_shared_http_port_warns() {
        let config = Config::default_embedded().unwrap();
        let result = validate_certificate_settings(&config);
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_loopback_challenge_port_is_quiet() {
        let mut config = Config::default_embedded().unwrap();
        config.certificates.challenge_address = "127.0.0.1:8089".into();
        let result = validate_certificate_settings(&config);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_interval_longer_than_window() {
        let mut config = Config::default_embedded().unwrap();
        config.certificates.renew_before_days = 1;
        config.certificates.check_interval_hours = 48;
        assert!(!validate_certificate_settings(&config).is_ok());
    }
}
