//! Reload request coalescing.
//!
//! Any component may ask for a reload through a cloned [`ReloadHandle`].
//! Requests arriving close together collapse into a single `reload_all`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;

/// Quiet period after the first request before reloading
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

const QUEUE_DEPTH: usize = 16;

/// Why a reload was asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub reason: String,
}

/// Cheap, cloneable sender side
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<ReloadRequest>,
}

impl ReloadHandle {
    pub fn channel() -> (Self, mpsc::Receiver<ReloadRequest>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Queue a reload. Never blocks; a full queue already holds one.
    pub fn request(&self, reason: &str) {
        match self.tx.try_send(ReloadRequest {
            reason: reason.to_string(),
        }) {
            Ok(()) => debug!(reason, "Reload requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(reason, "Reload queue full, request folded into pending one");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(reason, "Reload coordinator is gone, request dropped");
            }
        }
    }
}

pub struct ReloadCoordinator {
    rx: mpsc::Receiver<ReloadRequest>,
    debounce: Duration,
}

impl ReloadCoordinator {
    pub fn new(rx: mpsc::Receiver<ReloadRequest>) -> Self {
        Self {
            rx,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Wait for a request, then absorb everything else that arrives within
    /// the debounce window.
    ///
    /// Returns the distinct reasons, or `None` once every handle is dropped.
    pub async fn next_batch(&mut self) -> Option<Vec<String>> {
        let first = self.rx.recv().await?;
        let mut reasons = vec![first.reason];
        let deadline = Instant::now() + self.debounce;

        while let Ok(Some(request)) = timeout_at(deadline, self.rx.recv()).await {
            if !reasons.contains(&request.reason) {
                reasons.push(request.reason);
            }
        }
        Some(reasons)
    }

    /// Reload the fleet once per batch until every handle is dropped
    pub async fn run(mut self, orchestrator: Arc<Orchestrator>) {
        info!(debounce_ms = self.debounce.as_millis(), "Reload coordinator started");

        while let Some(reasons) = self.next_batch().await {
            info!(reasons = ?reasons, "Reloading fleet");
            if let Err(e) = orchestrator.reload_all().await {
                error!(error = %e, "Fleet reload incomplete");
            }
        }

        debug!("Reload coordinator stopped");
    }

    pub fn spawn(self, orchestrator: Arc<Orchestrator>) -> JoinHandle<()> {
        tokio::spawn(self.run(orchestrator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_coalesces_into_one_batch() {
        let (handle, rx) = ReloadHandle::channel();
        let mut coordinator = ReloadCoordinator::new(rx).with_debounce(Duration::from_millis(100));

        handle.request("SIGHUP");
        handle.request("certificates changed");
        handle.request("SIGHUP");

        let batch = coordinator.next_batch().await.unwrap();
        assert_eq!(batch, vec!["SIGHUP", "certificates changed"]);

        drop(handle);
        assert!(coordinator.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_requests_after_window_form_new_batch() {
        let (handle, rx) = ReloadHandle::channel();
        let mut coordinator = ReloadCoordinator::new(rx).with_debounce(Duration::from_millis(50));

        handle.request("first");
        assert_eq!(coordinator.next_batch().await.unwrap(), vec!["first"]);

        handle.request("second");
        assert_eq!(coordinator.next_batch().await.unwrap(), vec!["second"]);
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let (handle, _rx) = ReloadHandle::channel();
        for _ in 0..QUEUE_DEPTH * 2 {
            handle.request("flood");
        }
    }
}
