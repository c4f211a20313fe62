//! Common types and utilities shared by the Keel crates.
//!
//! - [`types`]: sites and instance status as seen by the control core
//! - [`ids`]: identifier newtypes
//! - [`jobs`]: pollable status for detached background work
//! - [`observability`]: tracing subscriber bootstrap

pub mod ids;
pub mod jobs;
pub mod observability;
pub mod types;

pub use ids::{CertificateId, JobId};
pub use jobs::{spawn_job, JobHandle, JobRecord, JobState};
pub use observability::{init_tracing, LogFormat, ObservabilityError};
pub use types::{InstanceStatus, Site, SiteStatus};
