//! Reload plumbing for the long-running binary.
//!
//! OS signals and certificate renewals both end in the same place: a
//! coalesced [`Orchestrator::reload_all`](crate::Orchestrator::reload_all).

mod coordinator;
mod signals;

pub use coordinator::{ReloadCoordinator, ReloadHandle, ReloadRequest, DEFAULT_DEBOUNCE};
pub use signals::{SignalManager, SignalType};
