//! Certificate lifecycle through the public API: issuance, renewal sweeps,
//! reload requests and the TLS material handed to the proxy renderer.

mod common;

use async_trait::async_trait;
use common::{config_in, site};
use keel::certs::{
    CertError, CertificateAuthority, CertificateManager, CertificateStatus, CertificateType,
    IssueRequest, IssuedCertificate, RenewalScheduler,
};
use keel::reload::ReloadHandle;
use keel::render::{render_proxy, RenderContext, TlsSource};
use keel_config::{AcmeProvider, Config};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Authority issuing short-lived certificates, optionally refusing
struct ShortLivedAuthority {
    days: i64,
    refuse: AtomicBool,
    issued: AtomicUsize,
}

impl ShortLivedAuthority {
    fn new(days: i64) -> Arc<Self> {
        Arc::new(Self {
            days,
            refuse: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CertificateAuthority for ShortLivedAuthority {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate, CertError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CertError::Acme {
                domain: request.domain.clone(),
                message: "rate limited".into(),
            });
        }
        self.issued.fetch_add(1, Ordering::SeqCst);

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![request.domain.clone()])?;
        params
            .distinguished_name
            .push(DnType::CommonName, request.domain.as_str());
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::hours(1);
        params.not_after = now + time::Duration::days(self.days);
        let cert = params.self_signed(&key)?;

        Ok(IssuedCertificate {
            cert_chain_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

fn setup(authority: Arc<ShortLivedAuthority>) -> (tempfile::TempDir, Config, Arc<CertificateManager>) {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let manager = Arc::new(CertificateManager::new(&config, authority));
    (dir, config, manager)
}

#[tokio::test]
async fn sweep_renews_due_certificate_and_requests_reload() {
    let authority = ShortLivedAuthority::new(10);
    let (_dir, _config, manager) = setup(authority.clone());

    let original = manager
        .issue_acme("shop", "shop.test", "ops@example.com", AcmeProvider::LetsEncrypt)
        .await
        .unwrap();
    assert_eq!(original.cert_type, CertificateType::Acme);
    assert!(original.auto_renew);

    let (reload, mut requests) = ReloadHandle::channel();
    let report = RenewalScheduler::new(manager.clone())
        .with_reload(reload)
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.renewed.len(), 1);
    assert_eq!(report.renewed[0].0, original.id);
    assert!(report.is_clean());
    assert_eq!(authority.issued.load(Ordering::SeqCst), 2);
    assert_eq!(requests.try_recv().unwrap().reason, "certificates changed");

    let remaining = manager.list().unwrap();
    assert_eq!(remaining.len(), 1);
    let renewed = &remaining[0];
    assert_eq!(renewed.id, report.renewed[0].1);
    assert!(renewed.last_renewed.is_some());
    assert_eq!(renewed.email.as_deref(), Some("ops@example.com"));
    assert!(!original.cert_path.exists());
    assert!(renewed.cert_path.exists());
}

#[tokio::test]
async fn failed_renewal_is_isolated() {
    let authority = ShortLivedAuthority::new(10);
    let (_dir, _config, manager) = setup(authority.clone());

    let shop = manager
        .issue_acme("shop", "shop.test", "ops@example.com", AcmeProvider::LetsEncrypt)
        .await
        .unwrap();
    let local = manager.issue_self_signed("blog", "blog.test").unwrap();

    authority.refuse.store(true, Ordering::SeqCst);
    let (reload, mut requests) = ReloadHandle::channel();
    let report = RenewalScheduler::new(manager.clone())
        .with_reload(reload)
        .run_once()
        .await
        .unwrap();

    assert!(report.renewed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, shop.id);
    assert!(requests.try_recv().is_err());

    // Material stays on disk; only the status changes
    let shop_now = manager.get(&shop.id).unwrap();
    assert_eq!(shop_now.status, CertificateStatus::Failed);
    assert!(shop_now.cert_path.exists());
    assert_eq!(
        manager.get(&local.id).unwrap().status,
        CertificateStatus::Active
    );
}

#[tokio::test]
async fn certificates_not_due_are_skipped() {
    let authority = ShortLivedAuthority::new(80);
    let (_dir, _config, manager) = setup(authority.clone());

    manager
        .issue_acme("shop", "shop.test", "ops@example.com", AcmeProvider::LetsEncrypt)
        .await
        .unwrap();
    let report = manager.auto_renew().await.unwrap();

    assert!(report.renewed.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(authority.issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn proxy_serves_managed_certificates() {
    let (dir, config, manager) = setup(ShortLivedAuthority::new(60));
    let cert = manager.issue_self_signed("shop", "shop.test").unwrap();

    let ctx = RenderContext::new(&config, vec![site("shop", "shop.test", "8.4", dir.path())])
        .with_tls(manager.tls_assignments());
    let text = render_proxy(&ctx, &config.proxy).unwrap();

    assert!(text.contains(&format!(
        "tls \"{}\" \"{}\"",
        cert.cert_path.display(),
        cert.key_path.display()
    )));
}

#[tokio::test]
async fn registry_is_plain_json() {
    let (_dir, config, manager) = setup(ShortLivedAuthority::new(60));
    let cert = manager.issue_self_signed("shop", "shop.test").unwrap();

    let raw = std::fs::read_to_string(config.paths.certificate_registry()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let record = &parsed[cert.id.as_str()];
    assert_eq!(record["type"], "self-signed");
    assert_eq!(record["status"], "active");
    assert_eq!(record["domain"], "shop.test");
    assert_eq!(record["auto_renew"], false);
}
