//! Signal handling for reload and shutdown.
//!
//! Bridges signal-hook's handler thread into the async runtime: SIGHUP
//! becomes [`SignalType::Reload`], SIGTERM and SIGINT become
//! [`SignalType::Shutdown`].

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Re-read configuration and reload (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

impl SignalType {
    fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGHUP => Some(SignalType::Reload),
            SIGTERM | SIGINT => Some(SignalType::Shutdown),
            _ => None,
        }
    }
}

pub struct SignalManager {
    rx: mpsc::UnboundedReceiver<SignalType>,
    handle: Handle,
}

impl SignalManager {
    /// Register handlers and start the forwarding thread
    pub fn install() -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
        let handle = signals.handle();
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("keel-signals".into())
            .spawn(move || {
                for raw in signals.forever() {
                    let Some(signal) = SignalType::from_raw(raw) else {
                        continue;
                    };
                    info!(signal = ?signal, "Received signal");
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                debug!("Signal thread exiting");
            })?;

        debug!("Signal handlers installed");
        Ok(Self { rx, handle })
    }

    /// Next signal; `None` after the manager is closed
    pub async fn recv(&mut self) -> Option<SignalType> {
        self.rx.recv().await
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        self.handle.close();
    }
}
