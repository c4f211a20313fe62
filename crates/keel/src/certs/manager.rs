//! Certificate lifecycle: issue, install, renew, delete.

use chrono::{DateTime, Utc};
use keel_common::{spawn_job, CertificateId, JobHandle};
use keel_config::{AcmeProvider, CertificatesConfig, Config};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::acme::{AccountStore, AcmeAuthority, CertificateAuthority, IssueRequest};
use super::inspect::{
    certificate_blocks, check_private_key, inspect_certificate, split_leaf, CertificateInfo,
};
use super::registry::Registry;
use super::self_signed::{self, SELF_SIGNED_ISSUER};
use super::storage::{MaterialStore, StoredFiles};
use super::{CertError, Certificate, CertificateStatus, CertificateType};
use crate::render::{is_valid_hostname, TlsMaterial, TlsSource};

/// Result of [`CertificateManager::renew`]
#[derive(Debug, Clone)]
pub enum RenewOutcome {
    /// Enough validity left; nothing was done
    NotDue { days_remaining: i64 },
    Renewed(Certificate),
}

/// Result of one auto-renew sweep
#[derive(Debug, Clone, Default)]
pub struct RenewalReport {
    /// Old id -> replacement id
    pub renewed: Vec<(CertificateId, CertificateId)>,
    pub not_due: Vec<CertificateId>,
    pub failed: Vec<(CertificateId, String)>,
}

impl RenewalReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CertificateManager {
    registry: Registry,
    store: MaterialStore,
    authority: Arc<dyn CertificateAuthority>,
    settings: CertificatesConfig,
    /// Held across a whole renewal so one id is never renewed twice
    renewals: tokio::sync::Mutex<()>,
}

impl CertificateManager {
    pub fn new(
        config: &Config,
        authority: Arc<dyn CertificateAuthority>,
    ) -> Self {
        Self {
            registry: Registry::new(config.paths.certificate_registry()),
            store: MaterialStore::new(config.paths.certificates_dir()),
            authority,
            settings: config.certificates.clone(),
            renewals: tokio::sync::Mutex::new(()),
        }
    }

    /// Manager backed by a real ACME authority
    pub fn from_config(config: &Config) -> Self {
        let authority = AcmeAuthority::new(
            AccountStore::new(config.paths.acme_accounts_dir()),
            config.certificates.challenge_address.clone(),
        );
        Self::new(config, Arc::new(authority))
    }

    pub fn settings(&self) -> &CertificatesConfig {
        &self.settings
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn list(&self) -> Result<Vec<Certificate>, CertError> {
        Ok(self.registry.load()?.into_values().collect())
    }

    pub fn get(&self, id: &CertificateId) -> Result<Certificate, CertError> {
        self.registry
            .load()?
            .remove(id)
            .ok_or_else(|| CertError::NotFound(id.clone()))
    }

    pub fn for_site(&self, site_id: &str) -> Result<Vec<Certificate>, CertError> {
        Ok(self
            .registry
            .load()?
            .into_values()
            .filter(|c| c.site_id == site_id)
            .collect())
    }

    /// First certificate recorded for `domain`, compared case-insensitively
    pub fn for_domain(&self, domain: &str) -> Result<Option<Certificate>, CertError> {
        Ok(self
            .registry
            .load()?
            .into_values()
            .find(|c| c.matches_domain(domain)))
    }

    /// Active certificates expiring within `days`
    pub fn check_expiring_soon(&self, days: u32) -> Result<Vec<Certificate>, CertError> {
        let now = Utc::now();
        Ok(self
            .registry
            .load()?
            .into_values()
            .filter(|c| c.is_active() && c.expires_within(days, now))
            .collect())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn delete(&self, id: &CertificateId) -> Result<(), CertError> {
        self.registry.update(|records| {
            records
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| CertError::NotFound(id.clone()))
        })?;
        self.store.remove(id);
        info!(id = %id, "Deleted certificate");
        Ok(())
    }

    pub fn update_status(
        &self,
        id: &CertificateId,
        status: CertificateStatus,
    ) -> Result<(), CertError> {
        self.registry.update(|records| {
            let cert = records
                .get_mut(id)
                .ok_or_else(|| CertError::NotFound(id.clone()))?;
            cert.status = status;
            cert.updated_at = Utc::now();
            Ok(())
        })?;
        debug!(id = %id, status = %status, "Updated certificate status");
        Ok(())
    }

    /// Flip active certificates whose validity has ended to expired
    pub fn mark_expired(&self) -> Result<Vec<CertificateId>, CertError> {
        let now = Utc::now();
        let expired = self.registry.update(|records| {
            let mut expired = Vec::new();
            for cert in records.values_mut() {
                if cert.is_active() && cert.valid_until <= now {
                    cert.status = CertificateStatus::Expired;
                    cert.updated_at = now;
                    expired.push(cert.id.clone());
                }
            }
            Ok(expired)
        })?;

        for id in &expired {
            warn!(id = %id, "Certificate has expired");
        }
        Ok(expired)
    }

    pub fn issue_self_signed(&self, site_id: &str, domain: &str) -> Result<Certificate, CertError> {
        let domain = normalize_domain(domain, true)?;
        let generated = self_signed::generate(&domain)?;
        let info = inspect_certificate(&generated.cert_pem)?;

        let id = CertificateId::new();
        let files = self
            .store
            .save(&id, &generated.cert_pem, &generated.key_pem, None)?;
        let mut cert = record(id, site_id, &domain, CertificateType::SelfSigned, &info, files);
        cert.issuer = SELF_SIGNED_ISSUER.to_string();
        cert.subject = domain.clone();

        self.insert(cert, None)
            .inspect(|c| info!(id = %c.id, domain = %domain, "Issued self-signed certificate"))
    }

    /// Validate and store operator-supplied material.
    ///
    /// Nothing is written unless both PEM inputs parse and the certificate
    /// covers `domain`.
    pub fn install_custom(
        &self,
        site_id: &str,
        domain: &str,
        cert_pem: &str,
        key_pem: &str,
        chain_pem: Option<&str>,
    ) -> Result<Certificate, CertError> {
        let domain = normalize_domain(domain, true)?;
        let info = inspect_certificate(cert_pem)?;
        check_private_key(key_pem)?;

        let chain_pem = chain_pem.map(str::trim).filter(|c| !c.is_empty());
        if let Some(chain) = chain_pem {
            certificate_blocks(chain)?;
        }

        if !info.covers(&domain) {
            return Err(CertError::DomainMismatch { domain });
        }

        // The proxy reads a single file, so a lone leaf gets the chain appended
        let served = match chain_pem {
            Some(chain) if info.chain_len == 1 => format!("{}\n{chain}\n", cert_pem.trim_end()),
            _ => cert_pem.to_string(),
        };

        let id = CertificateId::new();
        let files = self.store.save(&id, &served, key_pem, chain_pem)?;
        let cert = record(id, site_id, &domain, CertificateType::Custom, &info, files);

        self.insert(cert, None).inspect(|c| {
            info!(id = %c.id, domain = %domain, issuer = %c.issuer, "Installed custom certificate")
        })
    }

    /// Obtain a certificate from an ACME CA via HTTP-01
    pub async fn issue_acme(
        &self,
        site_id: &str,
        domain: &str,
        email: &str,
        provider: AcmeProvider,
    ) -> Result<Certificate, CertError> {
        let cert = self.acme_certificate(site_id, domain, email, provider).await?;
        self.insert(cert, None)
            .inspect(|c| info!(id = %c.id, domain = %c.domain, provider = %provider, "Issued ACME certificate"))
    }

    /// Replace an ACME certificate that is inside its renewal window.
    ///
    /// The replacement is issued before anything is removed, so a failed
    /// renewal leaves the current certificate in service. Renewals are
    /// serialised, so a second caller for the same id sees `NotFound` once the
    /// first has replaced it.
    pub async fn renew(&self, id: &CertificateId) -> Result<RenewOutcome, CertError> {
        let _renewing = self.renewals.lock().await;
        let current = self.get(id)?;

        if current.cert_type != CertificateType::Acme {
            return Err(CertError::NotRenewable {
                id: id.clone(),
                cert_type: current.cert_type,
            });
        }

        let days_remaining = current.days_remaining(Utc::now());
        if days_remaining > i64::from(self.settings.renew_before_days) {
            debug!(id = %id, days_remaining, "Certificate not due for renewal");
            return Ok(RenewOutcome::NotDue { days_remaining });
        }

        let email = current
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| CertError::MissingEmail(id.clone()))?;
        let provider = current.provider.unwrap_or(self.settings.provider);

        info!(id = %id, domain = %current.domain, days_remaining, "Renewing certificate");
        let mut replacement = self
            .acme_certificate(&current.site_id, &current.domain, email, provider)
            .await?;
        replacement.last_renewed = Some(Utc::now());
        replacement.auto_renew = current.auto_renew;

        let replacement = self.insert(replacement, Some(id))?;
        self.store.remove(id);
        info!(old = %id, new = %replacement.id, domain = %replacement.domain, "Certificate renewed");
        Ok(RenewOutcome::Renewed(replacement))
    }

    /// Renew every auto-renewing ACME certificate inside the renewal window.
    ///
    /// One failure does not stop the sweep; the failed certificate is marked
    /// failed and reported.
    pub async fn auto_renew(&self) -> Result<RenewalReport, CertError> {
        let due: Vec<_> = self
            .check_expiring_soon(self.settings.renew_before_days)?
            .into_iter()
            .filter(|c| c.auto_renew && c.cert_type == CertificateType::Acme)
            .collect();

        info!(due = due.len(), "Running certificate renewal sweep");
        let mut report = RenewalReport::default();

        for cert in due {
            match self.renew(&cert.id).await {
                Ok(RenewOutcome::Renewed(new)) => report.renewed.push((cert.id, new.id)),
                Ok(RenewOutcome::NotDue { .. }) => report.not_due.push(cert.id),
                Err(CertError::NotFound(_)) => {
                    debug!(id = %cert.id, "Certificate replaced by a concurrent renewal");
                }
                Err(e) => {
                    error!(id = %cert.id, domain = %cert.domain, error = %e, "Certificate renewal failed");
                    if let Err(status_err) = self.update_status(&cert.id, CertificateStatus::Failed) {
                        warn!(id = %cert.id, error = %status_err, "Could not mark certificate failed");
                    }
                    report.failed.push((cert.id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Run [`CertificateManager::auto_renew`] on a detached task
    pub fn spawn_auto_renew(self: &Arc<Self>) -> JobHandle {
        let manager = Arc::clone(self);
        spawn_job("certificate-renewal", move |job| async move {
            let report = manager.auto_renew().await?;
            job.progress(
                Some(100.0),
                Some(format!(
                    "{} renewed, {} failed",
                    report.renewed.len(),
                    report.failed.len()
                )),
            );
            match report.failed.first() {
                None => Ok(()),
                Some((id, reason)) => Err(CertError::acme(id.as_str(), reason)),
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Issue and store an ACME certificate without recording it
    async fn acme_certificate(
        &self,
        site_id: &str,
        domain: &str,
        email: &str,
        provider: AcmeProvider,
    ) -> Result<Certificate, CertError> {
        let domain = normalize_domain(domain, false)?;
        let email = email.trim();
        if email.is_empty() {
            return Err(CertError::EmailRequired);
        }

        let issued = self
            .authority
            .issue(&IssueRequest {
                domain: domain.clone(),
                email: email.to_string(),
                provider,
                staging: self.settings.staging,
            })
            .await?;

        let info = inspect_certificate(&issued.cert_chain_pem)?;
        let (_, chain) = split_leaf(&issued.cert_chain_pem);

        let id = CertificateId::new();
        let files = self.store.save(
            &id,
            &issued.cert_chain_pem,
            &issued.key_pem,
            chain.as_deref(),
        )?;

        let mut cert = record(id, site_id, &domain, CertificateType::Acme, &info, files);
        cert.provider = Some(provider);
        cert.email = Some(email.to_string());
        cert.auto_renew = true;
        Ok(cert)
    }

    /// Record `cert`, optionally dropping `replaces` in the same write.
    ///
    /// The new material is removed again when the registry cannot be saved.
    fn insert(
        &self,
        cert: Certificate,
        replaces: Option<&CertificateId>,
    ) -> Result<Certificate, CertError> {
        let saved = self.registry.update(|records| {
            if let Some(old) = replaces {
                records
                    .remove(old)
                    .ok_or_else(|| CertError::NotFound(old.clone()))?;
            }
            records.insert(cert.id.clone(), cert.clone());
            Ok(())
        });

        match saved {
            Ok(()) => Ok(cert),
            Err(e) => {
                self.store.remove(&cert.id);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("registry", &self.registry.path())
            .field("store", &self.store.base())
            .field("settings", &self.settings)
            .finish()
    }
}

impl TlsSource for CertificateManager {
    /// Servable certificate per domain, active before failed, then latest expiry
    fn tls_assignments(&self) -> HashMap<String, TlsMaterial> {
        let records = match self.registry.load() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Certificate registry unreadable, rendering without TLS assignments");
                return HashMap::new();
            }
        };

        let now = Utc::now();
        let rank = |c: &Certificate| (c.is_active(), c.valid_until);
        let mut best: HashMap<String, &Certificate> = HashMap::new();
        for cert in records.values().filter(|c| c.is_servable(now)) {
            let key = cert.domain.trim().to_ascii_lowercase();
            match best.get(&key) {
                Some(current) if rank(*current) >= rank(cert) => {}
                _ => {
                    best.insert(key, cert);
                }
            }
        }

        best.into_iter()
            .map(|(domain, cert)| (domain, cert.tls_material()))
            .collect()
    }
}

fn normalize_domain(domain: &str, allow_wildcard: bool) -> Result<String, CertError> {
    let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let wildcard = normalized.starts_with("*.");
    if !is_valid_hostname(&normalized) || (wildcard && !allow_wildcard) {
        return Err(CertError::InvalidDomain(domain.to_string()));
    }
    Ok(normalized)
}

fn record(
    id: CertificateId,
    site_id: &str,
    domain: &str,
    cert_type: CertificateType,
    info: &CertificateInfo,
    files: StoredFiles,
) -> Certificate {
    let now: DateTime<Utc> = Utc::now();
    Certificate {
        id,
        site_id: site_id.to_string(),
        domain: domain.to_string(),
        cert_type,
        status: CertificateStatus::Active,
        provider: None,
        auto_renew: false,
        email: None,
        cert_path: files.cert_path,
        key_path: files.key_path,
        chain_path: files.chain_path,
        issuer: info.issuer.clone(),
        subject: info.subject.clone(),
        valid_from: info.not_before,
        valid_until: info.not_after,
        last_renewed: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::acme::IssuedCertificate;
    use crate::render::fixtures;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    /// Authority that hands out self-signed material, or fails on demand
    #[derive(Default)]
    struct FakeAuthority {
        fail: bool,
        delay: std::time::Duration,
        requests: Mutex<Vec<IssueRequest>>,
    }

    #[async_trait]
    impl CertificateAuthority for FakeAuthority {
        async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, CertError> {
            self.requests.lock().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(CertError::acme(&request.domain, "rejected"));
            }
            let leaf = self_signed::generate(&request.domain)?;
            let intermediate = self_signed::generate("intermediate.test")?;
            Ok(IssuedCertificate {
                cert_chain_pem: format!("{}{}", leaf.cert_pem, intermediate.cert_pem),
                key_pem: leaf.key_pem,
            })
        }
    }

    fn manager_in(dir: &Path, authority: Arc<FakeAuthority>) -> CertificateManager {
        let mut config = fixtures::config();
        config.paths.data_dir = dir.to_path_buf();
        CertificateManager::new(&config, authority)
    }

    /// Force a record's expiry so renewal logic sees it as due
    fn set_valid_until(manager: &CertificateManager, id: &CertificateId, until: DateTime<Utc>) {
        manager
            .registry
            .update(|records| {
                records.get_mut(id).unwrap().valid_until = until;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_self_signed_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());

        let cert = manager.issue_self_signed("site-1", "Shop.Test").unwrap();
        assert_eq!(cert.domain, "shop.test");
        assert_eq!(cert.cert_type, CertificateType::SelfSigned);
        assert!(cert.is_active());
        assert!(!cert.auto_renew);
        assert!(cert.valid_from <= cert.valid_until);
        assert!(cert.cert_path.exists());

        assert_eq!(manager.for_site("site-1").unwrap().len(), 1);
        assert_eq!(
            manager.for_domain(" SHOP.test ").unwrap().map(|c| c.id),
            Some(cert.id.clone())
        );

        manager.delete(&cert.id).unwrap();
        assert!(manager.list().unwrap().is_empty());
        assert!(!cert.cert_path.exists());
        assert!(matches!(manager.delete(&cert.id), Err(CertError::NotFound(_))));
    }

    #[test]
    fn test_install_custom_rejects_mismatch_without_traces() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let other = self_signed::generate("other.test").unwrap();

        let err = manager
            .install_custom("site-1", "shop.test", &other.cert_pem, &other.key_pem, None)
            .unwrap_err();

        assert!(matches!(err, CertError::DomainMismatch { .. }));
        assert!(manager.list().unwrap().is_empty());
        let leftovers = std::fs::read_dir(dir.path().join("certificates"))
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_install_custom_appends_chain() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let leaf = self_signed::generate("shop.test").unwrap();
        let chain = self_signed::generate("ca.test").unwrap();

        let cert = manager
            .install_custom("site-1", "www.shop.test", &leaf.cert_pem, &leaf.key_pem, Some(&chain.cert_pem))
            .unwrap();

        assert_eq!(cert.cert_type, CertificateType::Custom);
        let served = std::fs::read_to_string(&cert.cert_path).unwrap();
        assert_eq!(served.matches("BEGIN CERTIFICATE").count(), 2);
        assert!(cert.chain_path.unwrap().exists());
    }

    #[test]
    fn test_install_custom_rejects_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let leaf = self_signed::generate("shop.test").unwrap();

        let err = manager
            .install_custom("site-1", "shop.test", &leaf.cert_pem, "not a key", None)
            .unwrap_err();
        assert!(matches!(err, CertError::Pem(_)));
    }

    #[tokio::test]
    async fn test_issue_acme_records_chain_and_email() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let manager = manager_in(dir.path(), Arc::clone(&authority));

        let cert = manager
            .issue_acme("site-1", "shop.test", "ops@example.com", AcmeProvider::LetsEncrypt)
            .await
            .unwrap();

        assert_eq!(cert.cert_type, CertificateType::Acme);
        assert!(cert.auto_renew);
        assert_eq!(cert.email.as_deref(), Some("ops@example.com"));
        assert_eq!(cert.provider, Some(AcmeProvider::LetsEncrypt));
        let chain = std::fs::read_to_string(cert.chain_path.unwrap()).unwrap();
        assert_eq!(chain.matches("BEGIN CERTIFICATE").count(), 1);
        assert_eq!(authority.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_acme_requires_email() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let err = manager
            .issue_acme("site-1", "shop.test", "  ", AcmeProvider::LetsEncrypt)
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::EmailRequired));
    }

    #[tokio::test]
    async fn test_renew_rules() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        let manager = manager_in(dir.path(), Arc::clone(&authority));

        let self_signed = manager.issue_self_signed("site-1", "a.test").unwrap();
        assert!(matches!(
            manager.renew(&self_signed.id).await,
            Err(CertError::NotRenewable { .. })
        ));

        let acme = manager
            .issue_acme("site-1", "b.test", "ops@example.com", AcmeProvider::LetsEncrypt)
            .await
            .unwrap();
        assert!(matches!(
            manager.renew(&acme.id).await.unwrap(),
            RenewOutcome::NotDue { .. }
        ));
        assert_eq!(authority.requests.lock().len(), 1);

        set_valid_until(&manager, &acme.id, Utc::now() + chrono::Duration::days(5));
        let RenewOutcome::Renewed(new) = manager.renew(&acme.id).await.unwrap() else {
            panic!("expected a renewal");
        };
        assert_ne!(new.id, acme.id);
        assert!(new.last_renewed.is_some());
        assert!(matches!(manager.get(&acme.id), Err(CertError::NotFound(_))));
        assert!(!acme.cert_path.exists());
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_old_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let good = Arc::new(FakeAuthority::default());
        let manager = manager_in(dir.path(), good);
        let acme = manager
            .issue_acme("site-1", "b.test", "ops@example.com", AcmeProvider::LetsEncrypt)
            .await
            .unwrap();
        set_valid_until(&manager, &acme.id, Utc::now() + chrono::Duration::days(2));

        let failing = Arc::new(FakeAuthority {
            fail: true,
            ..FakeAuthority::default()
        });
        let manager = manager_in(dir.path(), failing);
        let report = manager.auto_renew().await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_clean());
        let kept = manager.get(&acme.id).unwrap();
        assert_eq!(kept.status, CertificateStatus::Failed);
        assert!(kept.cert_path.exists());
    }

    #[test]
    fn test_mark_expired_and_expiring_soon() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let soon = manager.issue_self_signed("s", "soon.test").unwrap();
        let gone = manager.issue_self_signed("s", "gone.test").unwrap();
        manager.issue_self_signed("s", "later.test").unwrap();

        set_valid_until(&manager, &soon.id, Utc::now() + chrono::Duration::days(3));
        set_valid_until(&manager, &gone.id, Utc::now() - chrono::Duration::days(1));

        let expiring: Vec<_> = manager
            .check_expiring_soon(30)
            .unwrap()
            .into_iter()
            .map(|c| c.domain)
            .collect();
        assert_eq!(expiring.len(), 2);
        assert!(!expiring.contains(&"later.test".to_string()));

        assert_eq!(manager.mark_expired().unwrap(), vec![gone.id.clone()]);
        assert_eq!(manager.get(&gone.id).unwrap().status, CertificateStatus::Expired);
    }

    #[test]
    fn test_tls_assignments_prefer_latest_active() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let older = manager.issue_self_signed("s", "shop.test").unwrap();
        let newer = manager.issue_self_signed("s", "shop.test").unwrap();
        set_valid_until(&manager, &older.id, Utc::now() + chrono::Duration::days(10));

        // A failed record outliving the active one still loses to it
        let failed = manager.issue_self_signed("s", "shop.test").unwrap();
        manager
            .update_status(&failed.id, CertificateStatus::Failed)
            .unwrap();
        set_valid_until(&manager, &failed.id, Utc::now() + chrono::Duration::days(800));

        let lapsed = manager.issue_self_signed("s", "down.test").unwrap();
        manager
            .update_status(&lapsed.id, CertificateStatus::Failed)
            .unwrap();
        set_valid_until(&manager, &lapsed.id, Utc::now() - chrono::Duration::days(1));

        let tls = manager.tls_assignments();
        assert_eq!(tls.len(), 1);
        assert_eq!(tls["shop.test"].cert_path, newer.cert_path);
    }

    #[tokio::test]
    async fn test_failed_sweep_keeps_serving_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let acme = manager
            .issue_acme("site-1", "b.test", "ops@example.com", AcmeProvider::LetsEncrypt)
            .await
            .unwrap();
        set_valid_until(&manager, &acme.id, Utc::now() + chrono::Duration::days(20));

        let failing = Arc::new(FakeAuthority {
            fail: true,
            ..FakeAuthority::default()
        });
        let manager = manager_in(dir.path(), failing);
        let report = manager.auto_renew().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(manager.get(&acme.id).unwrap().status, CertificateStatus::Failed);

        let tls = manager.tls_assignments();
        assert_eq!(tls["b.test"].cert_path, acme.cert_path);
    }

    #[tokio::test]
    async fn test_concurrent_renewals_issue_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        let acme = manager
            .issue_acme("site-1", "b.test", "ops@example.com", AcmeProvider::LetsEncrypt)
            .await
            .unwrap();
        set_valid_until(&manager, &acme.id, Utc::now() + chrono::Duration::days(5));

        let slow = Arc::new(FakeAuthority {
            delay: std::time::Duration::from_millis(100),
            ..FakeAuthority::default()
        });
        let manager = manager_in(dir.path(), Arc::clone(&slow));
        let (first, second) = tokio::join!(manager.renew(&acme.id), manager.renew(&acme.id));

        let renewed = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Ok(RenewOutcome::Renewed(_))))
            .count();
        assert_eq!(renewed, 1);
        assert!([first, second]
            .iter()
            .any(|r| matches!(r, Err(CertError::NotFound(_)))));
        assert_eq!(slow.requests.lock().len(), 1);
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), Arc::default());
        assert!(matches!(
            manager.issue_self_signed("s", "bad domain"),
            Err(CertError::InvalidDomain(_))
        ));
    }
}
