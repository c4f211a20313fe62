//! Placing binaries and asking them for their version.

use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::ProvisionError;

/// Copy `source` to `dest` and mark it executable
pub fn install_binary(source: &Path, dest: &Path) -> Result<PathBuf, ProvisionError> {
    tracing::info!(
        source = %source.display(),
        dest = %dest.display(),
        "Installing binary"
    );

    std::fs::copy(source, dest).map_err(|e| ProvisionError::io(dest, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| ProvisionError::io(dest, e))?;
    }

    Ok(dest.to_path_buf())
}

/// Version reported by `<binary> --version`.
///
/// `None` when the binary is missing; `"unknown"` when it runs but does not
/// print anything version-like.
pub async fn installed_version(binary: &Path) -> Option<String> {
    if !binary.exists() {
        return None;
    }

    let output = Command::new(binary).arg("--version").output().await.ok()?;
    if !output.status.success() {
        return Some("unknown".to_string());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(parse_version_output(&stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// First semver-looking token, with a leading `v` and any suffix removed
fn parse_version_output(output: &str) -> Option<String> {
    // "FrankenPHP v1.4.0 PHP 8.4.3 Caddy v2.9.1 h1:..."
    // "frankenphp 1.4.0"
    output
        .lines()
        .flat_map(str::split_whitespace)
        .map(|word| word.strip_prefix('v').unwrap_or(word))
        .find(|word| word.starts_with(|c: char| c.is_ascii_digit()) && word.contains('.'))
        .map(|word| {
            let version = word.split('-').next().unwrap_or(word);
            version.split('+').next().unwrap_or(version).to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output("FrankenPHP v1.4.0 PHP 8.4.3 Caddy v2.9.1 h1:abc"),
            Some("1.4.0".to_string())
        );
        assert_eq!(
            parse_version_output("frankenphp 1.2.5"),
            Some("1.2.5".to_string())
        );
        assert_eq!(
            parse_version_output("1.3.0-beta+build123"),
            Some("1.3.0".to_string())
        );
        assert_eq!(parse_version_output("no version here"), None);
    }

    #[test]
    fn test_install_binary_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::write(&source, b"#!/bin/sh\n").unwrap();
        let dest = dir.path().join("frankenphp");

        install_binary(&source, &dest).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_installed_version_runs_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("frankenphp");
        std::fs::write(&binary, "#!/bin/sh\necho 'FrankenPHP v1.4.2 PHP 8.4.1'\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(installed_version(&binary).await.as_deref(), Some("1.4.2"));
        assert_eq!(installed_version(&dir.path().join("missing")).await, None);
    }
}
