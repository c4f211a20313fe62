//! Host platform detection and normalisation to release asset naming.

use std::fmt;

use super::ProvisionError;

/// Platform in the form release assets are named by, e.g. `linux-x86_64`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    os: &'static str,
    arch: &'static str,
}

impl Platform {
    /// The platform this process runs on
    pub fn detect() -> Result<Self, ProvisionError> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Normalise an OS/arch pair.
    ///
    /// Linux keeps `aarch64` while macOS builds are named `arm64`.
    pub fn from_parts(os: &str, arch: &str) -> Result<Self, ProvisionError> {
        let os = match os.to_ascii_lowercase().as_str() {
            "linux" => "linux",
            "macos" | "darwin" | "mac" => "mac",
            _ => return Err(unsupported(os, arch)),
        };
        let arch = match (os, arch.to_ascii_lowercase().as_str()) {
            (_, "x86_64" | "amd64") => "x86_64",
            ("linux", "aarch64" | "arm64") => "aarch64",
            ("mac", "aarch64" | "arm64") => "arm64",
            _ => return Err(unsupported(os, arch)),
        };
        Ok(Self { os, arch })
    }

    pub fn os(&self) -> &str {
        self.os
    }

    pub fn arch(&self) -> &str {
        self.arch
    }
}

fn unsupported(os: &str, arch: &str) -> ProvisionError {
    ProvisionError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalisation_table() {
        let cases = [
            ("linux", "x86_64", "linux-x86_64"),
            ("linux", "amd64", "linux-x86_64"),
            ("linux", "aarch64", "linux-aarch64"),
            ("linux", "arm64", "linux-aarch64"),
            ("macos", "aarch64", "mac-arm64"),
            ("darwin", "arm64", "mac-arm64"),
            ("darwin", "amd64", "mac-x86_64"),
        ];
        for (os, arch, expected) in cases {
            assert_eq!(
                Platform::from_parts(os, arch).unwrap().to_string(),
                expected,
                "{os}/{arch}"
            );
        }
    }

    #[test]
    fn test_unsupported() {
        assert!(matches!(
            Platform::from_parts("windows", "x86_64"),
            Err(ProvisionError::UnsupportedPlatform { .. })
        ));
        assert!(Platform::from_parts("linux", "riscv64").is_err());
    }

    proptest! {
        #[test]
        fn prop_normalisation_is_case_insensitive(
            os in prop::sample::select(vec!["linux", "macos", "darwin"]),
            arch in prop::sample::select(vec!["x86_64", "amd64", "aarch64", "arm64"]),
        ) {
            let lower = Platform::from_parts(os, arch).unwrap();
            let upper = Platform::from_parts(&os.to_uppercase(), &arch.to_uppercase()).unwrap();
            prop_assert_eq!(lower, upper);
        }
    }
}
