//! Port availability checks
//!
//! Tries to bind every port the fleet will listen on, so a busy port is
//! reported before any process is started.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::io::ErrorKind;
use tokio::net::TcpListener;

/// Probe every claimed port on all interfaces
pub async fn validate_ports_available(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (port, owner) in config.claimed_ports() {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => drop(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Network,
                    format!("Port {} ({}) is already in use", port, owner),
                ));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                result.add_warning(ValidationWarning::new(format!(
                    "Port {} ({}) needs elevated privileges to bind",
                    port, owner
                )));
            }
            Err(e) => {
                result.add_warning(ValidationWarning::new(format!(
                    "Could not probe port {} ({}): {}",
                    port, owner, e
                )));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_busy_port_is_reported() {
        let holder = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let busy = holder.local_addr().unwrap().port();

        let mut config = Config::default_embedded().unwrap();
        config.proxy.http_port = busy;
        config.proxy.https_port = 0;
        config.proxy.admin_port = 0;
        for runtime in &mut config.runtimes {
            runtime.port = 0;
            runtime.admin_port = 0;
        }

        let result = validate_ports_available(&config).await;
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains(&busy.to_string()));
    }
}
