//! Background certificate renewal scheduler
//!
//! Periodically sweeps the registry, renews what is due and asks for a proxy
//! reload so renewed certificates are served.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::{CertError, CertificateManager, RenewalReport};
use crate::reload::ReloadHandle;

/// Default check interval (12 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

const INITIAL_DELAY: Duration = Duration::from_secs(10);

pub struct RenewalScheduler {
    manager: Arc<CertificateManager>,
    reload: Option<ReloadHandle>,
    check_interval: Duration,
    initial_delay: Duration,
}

impl RenewalScheduler {
    /// Scheduler using the manager's configured interval
    pub fn new(manager: Arc<CertificateManager>) -> Self {
        let hours = manager.settings().check_interval_hours;
        Self {
            manager,
            reload: None,
            check_interval: Duration::from_secs(hours.saturating_mul(3600)).max(MIN_CHECK_INTERVAL),
            initial_delay: INITIAL_DELAY,
        }
    }

    /// Set the check interval, clamped to at least one hour
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Where to send reload requests after a successful renewal
    pub fn with_reload(mut self, reload: ReloadHandle) -> Self {
        self.reload = Some(reload);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the renewal loop forever
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        tokio::time::sleep(self.initial_delay).await;

        let mut interval = interval(self.check_interval);
        loop {
            // First tick completes immediately
            interval.tick().await;
            debug!("Running scheduled certificate renewal check");

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Certificate renewal check failed");
            }
        }
    }

    /// One sweep: expire, renew, then request a reload if anything changed
    pub async fn run_once(&self) -> Result<RenewalReport, CertError> {
        let expired = self.manager.mark_expired()?;
        let report = self.manager.auto_renew().await?;

        info!(
            renewed = report.renewed.len(),
            failed = report.failed.len(),
            expired = expired.len(),
            "Certificate renewal check complete"
        );

        if !report.renewed.is_empty() || !expired.is_empty() {
            if let Some(reload) = &self.reload {
                reload.request("certificates changed");
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("reload", &self.reload.is_some())
            .finish()
    }
}
