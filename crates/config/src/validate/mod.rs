//! Configuration checks beyond schema validation.
//!
//! [`validate_config`] runs every check and collects the findings. Errors
//! mean the configuration cannot work on this host; warnings are advice.

use std::fmt;

use crate::Config;

pub mod certs;
pub mod lint;
pub mod network;

/// Area a validation error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Schema,
    Network,
    Certificate,
    Filesystem,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Schema => "schema",
            ErrorCategory::Network => "network",
            ErrorCategory::Certificate => "certificate",
            ErrorCategory::Filesystem => "filesystem",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collected findings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every check.
///
/// `probe_ports` additionally tries to bind each configured port, which only
/// makes sense before the fleet is started.
pub async fn validate_config(config: &Config, probe_ports: bool) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(e) = config.validate() {
        result.add_error(ValidationError::new(ErrorCategory::Schema, e.to_string()));
    }

    result.merge(certs::validate_certificate_settings(config));
    result.merge(validate_paths(config));
    if probe_ports {
        result.merge(network::validate_ports_available(config).await);
    }
    result.merge(lint::lint_config(config));

    result
}

/// Configured roots must be directories if they already exist
pub fn validate_paths(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let roots = [
        ("data-dir", &config.paths.data_dir),
        ("log-dir", &config.paths.log_dir),
        ("socket-dir", &config.paths.socket_dir),
    ];
    for (name, path) in roots {
        if path.exists() && !path.is_dir() {
            result.add_error(ValidationError::new(
                ErrorCategory::Filesystem,
                format!("{} {} exists but is not a directory", name, path.display()),
            ));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_as_data_dir_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = Config::default_embedded().unwrap();
        config.paths.data_dir = file.path().to_path_buf();

        let result = validate_paths(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Filesystem);
    }

    #[tokio::test]
    async fn test_default_config_has_no_errors() {
        let config = Config::default_embedded().unwrap();
        let result = validate_config(&config, false).await;
        assert!(result.is_ok(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn test_display() {
        let e = ValidationError::new(ErrorCategory::Network, "port 80 busy");
        assert_eq!(e.to_string(), "[network] port 80 busy");
    }
}
