//! Configuration linting
//!
//! Flags settings that work but are probably not what an operator wants.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, ENV_RUNTIME_USER};

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.enabled_runtimes().next().is_none() {
        result.add_warning(ValidationWarning::new(
            "No runtime is enabled; only the proxy will be started",
        ));
    }

    if config.dev_mode {
        result.add_warning(ValidationWarning::new(
            "Development mode is on: automatic HTTPS is disabled and sites are served over plain HTTP",
        ));
    }

    if config.admin_email.is_none() && !config.dev_mode {
        result.add_warning(ValidationWarning::new(
            "No admin-email configured; ACME issuance will need an explicit contact email",
        ));
    }

    if config.runtime_user == "root" {
        result.add_warning(ValidationWarning::new(
            "runtime-user is root; PHP code would run with full privileges",
        ));
    }

    if std::env::var(ENV_RUNTIME_USER).as_deref() == Ok("root") {
        result.add_warning(ValidationWarning::new(format!(
            "{}=root is set; runtimes will not drop privileges",
            ENV_RUNTIME_USER
        )));
    }

    for runtime in config.enabled_runtimes() {
        if runtime.max_threads != 0 && runtime.num_threads > runtime.max_threads {
            result.add_warning(ValidationWarning::new(format!(
                "Runtime '{}' starts {} threads but caps at {}",
                runtime.version, runtime.num_threads, runtime.max_threads
            )));
        }
    }

    let binaries: Vec<_> = config
        .enabled_runtimes()
        .filter(|r| !r.binary.exists())
        .map(|r| r.version.clone())
        .collect();
    if !binaries.is_empty() {
        result.add_warning(ValidationWarning::new(format!(
            "Binaries missing for runtime(s) {}; they will be downloaded on start",
            binaries.join(", ")
        )));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_enabled_runtime_warns() {
        let mut config = Config::default_embedded().unwrap();
        for runtime in &mut config.runtimes {
            runtime.enabled = false;
        }
        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("No runtime is enabled")));
    }

    #[test]
    fn test_thread_knobs_inverted() {
        let mut config = Config::default_embedded().unwrap();
        config.runtimes[0].num_threads = 8;
        config.runtimes[0].max_threads = 4;
        let result = lint_config(&config);
        assert!(result.warnings.iter().any(|w| w.message.contains("caps at 4")));
    }

    #[test]
    fn test_lint_never_errors() {
        let config = Config::default_embedded().unwrap();
        assert!(lint_config(&config).is_ok());
    }
}
