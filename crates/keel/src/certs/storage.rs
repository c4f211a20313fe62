//! Certificate material on disk.
//!
//! ```text
//! certificates/
//! └── <id>/
//!     ├── cert.pem      # leaf, plus chain for CA-issued certificates
//!     ├── key.pem       # private key, 0600
//!     └── chain.pem     # issuer chain, when known
//! ```

use keel_common::CertificateId;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::CertError;
use crate::fs::write_atomic;

/// Paths written for one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub chain_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MaterialStore {
    base: PathBuf,
}

impl MaterialStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn dir_for(&self, id: &CertificateId) -> Result<PathBuf, CertError> {
        if !id.is_path_safe() {
            return Err(CertError::InvalidId(id.clone()));
        }
        Ok(self.base.join(id.as_str()))
    }

    /// Write the PEM files for `id`, creating its directory with mode 0700
    pub fn save(
        &self,
        id: &CertificateId,
        cert_pem: &str,
        key_pem: &str,
        chain_pem: Option<&str>,
    ) -> Result<StoredFiles, CertError> {
        let dir = self.dir_for(id)?;
        create_private_dir(&self.base)?;
        create_private_dir(&dir)?;

        let files = StoredFiles {
            cert_path: dir.join("cert.pem"),
            key_path: dir.join("key.pem"),
            chain_path: chain_pem.map(|_| dir.join("chain.pem")),
        };

        let written = (|| -> Result<(), CertError> {
            write_atomic(&files.cert_path, cert_pem.as_bytes(), Some(0o644))
                .map_err(|e| CertError::io(&files.cert_path, e))?;
            write_atomic(&files.key_path, key_pem.as_bytes(), Some(0o600))
                .map_err(|e| CertError::io(&files.key_path, e))?;
            if let (Some(path), Some(chain)) = (&files.chain_path, chain_pem) {
                write_atomic(path, chain.as_bytes(), Some(0o644))
                    .map_err(|e| CertError::io(path, e))?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            self.remove(id);
            return Err(e);
        }

        debug!(id = %id, dir = %dir.display(), "Stored certificate material");
        Ok(files)
    }

    /// Remove the directory for `id`. Failures are logged, not returned.
    pub fn remove(&self, id: &CertificateId) {
        let Ok(dir) = self.dir_for(id) else {
            return;
        };
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(id = %id, "Removed certificate material"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(id = %id, dir = %dir.display(), error = %e, "Failed to remove certificate material"),
        }
    }
}

pub(crate) fn create_private_dir(path: &Path) -> Result<(), CertError> {
    fs::create_dir_all(path).map_err(|e| CertError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|e| CertError::io(path, e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_layout_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        let store = MaterialStore::new(dir.path().join("certificates"));
        let id = CertificateId::new();

        let files = store.save(&id, "CERT", "KEY", Some("CHAIN")).unwrap();

        assert_eq!(files.cert_path, store.base().join(id.as_str()).join("cert.pem"));
        assert_eq!(std::fs::read_to_string(&files.key_path).unwrap(), "KEY");
        assert_eq!(
            std::fs::read_to_string(files.chain_path.as_ref().unwrap()).unwrap(),
            "CHAIN"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let key_mode = std::fs::metadata(&files.key_path).unwrap().permissions().mode();
            assert_eq!(key_mode & 0o777, 0o600);
            let dir_mode = std::fs::metadata(files.cert_path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(dir_mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_no_chain_file_without_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = MaterialStore::new(dir.path());
        let files = store.save(&CertificateId::new(), "C", "K", None).unwrap();
        assert!(files.chain_path.is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MaterialStore::new(dir.path());
        let id = CertificateId::new();
        store.save(&id, "C", "K", None).unwrap();

        store.remove(&id);
        store.remove(&id);
        assert!(!dir.path().join(id.as_str()).exists());
    }

    #[test]
    fn test_rejects_unsafe_id() {
        let store = MaterialStore::new("/tmp/certs");
        assert!(store.dir_for(&CertificateId::from("../escape")).is_err());
    }
}
