//! Supervised process state and the reports built from it.

use chrono::{DateTime, Utc};
use keel_common::InstanceStatus;
use keel_config::{ProxyConfig, RuntimeVersionSpec};
use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Child;

/// Process bookkeeping shared by runtimes and the proxy
#[derive(Debug)]
pub(crate) struct Supervised {
    pub status: InstanceStatus,
    pub child: Option<Child>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pid_file: PathBuf,
}

impl Supervised {
    pub fn new(pid_file: PathBuf) -> Self {
        Self {
            status: InstanceStatus::Stopped,
            child: None,
            pid: None,
            started_at: None,
            last_error: None,
            pid_file,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running && self.child.is_some()
    }

    pub fn mark_running(&mut self, child: Child) {
        self.pid = child.id();
        self.child = Some(child);
        self.status = InstanceStatus::Running;
        self.started_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_stopped(&mut self) {
        self.child = None;
        self.pid = None;
        self.status = InstanceStatus::Stopped;
        self.started_at = None;
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.child = None;
        self.pid = None;
        self.status = InstanceStatus::Error;
        self.started_at = None;
        self.last_error = Some(error.into());
    }

    fn uptime_secs(&self) -> Option<i64> {
        self.started_at
            .map(|started| (Utc::now() - started).num_seconds().max(0))
    }
}

#[derive(Debug)]
pub(crate) struct RuntimeInstance {
    pub spec: RuntimeVersionSpec,
    pub process: Supervised,
}

#[derive(Debug)]
pub(crate) struct ProxyInstance {
    pub config: ProxyConfig,
    pub process: Supervised,
}

/// Point-in-time report for one runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceInfo {
    pub version: String,
    pub port: u16,
    pub admin_port: u16,
    pub binary: PathBuf,
    pub binary_present: bool,
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub last_error: Option<String>,
    pub site_count: usize,
    /// Advisory, zero when the control API did not answer
    pub threads: usize,
}

impl InstanceInfo {
    pub(crate) fn from_instance(instance: &RuntimeInstance, site_count: usize) -> Self {
        let process = &instance.process;
        Self {
            version: instance.spec.version.clone(),
            port: instance.spec.port,
            admin_port: instance.spec.admin_port,
            binary: instance.spec.binary.clone(),
            binary_present: instance.spec.binary.exists(),
            status: process.status,
            pid: process.pid,
            started_at: process.started_at,
            uptime_secs: process.uptime_secs(),
            last_error: process.last_error.clone(),
            site_count,
            threads: 0,
        }
    }
}

/// Point-in-time report for the edge proxy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyInfo {
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub last_error: Option<String>,
    pub http_port: u16,
    pub https_port: u16,
    pub admin_port: u16,
}

impl ProxyInfo {
    pub(crate) fn from_instance(instance: &ProxyInstance) -> Self {
        let process = &instance.process;
        Self {
            status: process.status,
            pid: process.pid,
            started_at: process.started_at,
            uptime_secs: process.uptime_secs(),
            last_error: process.last_error.clone(),
            http_port: instance.config.http_port,
            https_port: instance.config.https_port,
            admin_port: instance.config.admin_port,
        }
    }
}
