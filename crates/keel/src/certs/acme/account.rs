//! Cached ACME account credentials, one file per provider and contact email.

use instant_acme::AccountCredentials;
use keel_config::AcmeProvider;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::certs::storage::create_private_dir;
use crate::certs::CertError;
use crate::fs::write_atomic;

#[derive(Debug, Clone)]
pub struct AccountStore {
    dir: PathBuf,
}

impl AccountStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<provider>/<email>.json`, with the email reduced to a safe file name
    pub fn path_for(&self, provider: AcmeProvider, email: &str) -> PathBuf {
        let name: String = email
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '@' | '.' | '-' | '_' | '+' => c,
                _ => '_',
            })
            .collect();
        self.dir
            .join(provider.as_str())
            .join(format!("{name}.json"))
    }

    /// Cached credentials, if any. An unreadable file is treated as absent.
    pub fn load(&self, provider: AcmeProvider, email: &str) -> Option<AccountCredentials> {
        let path = self.path_for(provider, email);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(credentials) => {
                debug!(path = %path.display(), "Loaded ACME account credentials");
                Some(credentials)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable ACME account file");
                None
            }
        }
    }

    pub fn save(
        &self,
        provider: AcmeProvider,
        email: &str,
        credentials: &AccountCredentials,
    ) -> Result<(), CertError> {
        let path = self.path_for(provider, email);
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }
        let json = serde_json::to_vec_pretty(credentials)
            .map_err(|e| CertError::acme(email, format!("cannot encode account: {e}")))?;
        write_atomic(&path, &json, Some(0o600)).map_err(|e| CertError::io(&path, e))?;

        info!(provider = %provider, email, path = %path.display(), "Saved ACME account credentials");
        Ok(())
    }
}
