//! The certificate registry file.
//!
//! A single pretty-printed JSON object keyed by certificate id. Every
//! mutation is a load-modify-save cycle under one lock, and saves go through
//! a temp file and rename.

use keel_common::CertificateId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

use super::{CertError, Certificate};
use crate::fs::write_atomic;

pub type Records = BTreeMap<CertificateId, Certificate>;

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every record. A missing file is an empty registry.
    pub fn load(&self) -> Result<Records, CertError> {
        let _guard = self.lock.lock();
        self.read()
    }

    /// Run `f` against the records and persist the result.
    ///
    /// Nothing is written when `f` fails.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut Records) -> Result<T, CertError>,
    ) -> Result<T, CertError> {
        let _guard = self.lock.lock();
        let mut records = self.read()?;
        let out = f(&mut records)?;
        self.write(&records)?;
        Ok(out)
    }

    fn read(&self) -> Result<Records, CertError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(CertError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Records::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| CertError::Registry {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write(&self, records: &Records) -> Result<(), CertError> {
        let json = serde_json::to_vec_pretty(records).map_err(|e| CertError::Registry {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &json, Some(0o600)).map_err(|e| CertError::io(&self.path, e))?;
        trace!(path = %self.path.display(), records = records.len(), "Saved certificate registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::model::fixtures::certificate;
    use crate::certs::CertificateType;
    use std::sync::Arc;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("certificates.json"));
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn test_update_persists_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("certificates.json"));
        let cert = certificate("shop.test", CertificateType::SelfSigned, 365);
        let id = cert.id.clone();

        registry
            .update(|records| {
                records.insert(cert.id.clone(), cert);
                Ok(())
            })
            .unwrap();

        let text = std::fs::read_to_string(registry.path()).unwrap();
        assert!(text.contains("\n  \""));
        assert!(registry.load().unwrap().contains_key(&id));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("certificates.json"));

        let result: Result<(), _> = registry.update(|records| {
            let cert = certificate("shop.test", CertificateType::Custom, 10);
            records.insert(cert.id.clone(), cert);
            Err(CertError::InvalidDomain("x".into()))
        });

        assert!(result.is_err());
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_corrupt_registry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certificates.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Registry::new(&path).load().unwrap_err();
        assert!(matches!(err, CertError::Registry { .. }));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("certificates.json")));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let cert = certificate(&format!("s{i}.test"), CertificateType::Custom, 10);
                    registry
                        .update(|records| {
                            records.insert(cert.id.clone(), cert);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.load().unwrap().len(), 8);
    }
}
