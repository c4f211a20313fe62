//! Runtime fleet and edge proxy supervision.
//!
//! The [`Orchestrator`] owns one supervised process per enabled runtime
//! version and one edge proxy. Every lifecycle operation renders fresh
//! configuration from the current sites, writes it next to the process and
//! either starts the process on it or pushes it over the control API.
//!
//! # State machine
//!
//! ```text
//! stopped --start--> running --stop/crash--> stopped
//!                    running --reload--> running
//! spawn failure or unexpected exit --> error (reported, never retried)
//! ```
//!
//! One `tokio::sync::RwLock` guards all instances: lifecycle operations take
//! it exclusively for their whole duration, reports share it.

use arc_swap::ArcSwap;
use keel_config::{Config, RuntimeVersionSpec, Transport};
use keel_helper_protocol::HelperClient;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod account;
mod error;
mod instance;
mod process;

pub use account::{Credentials, ENV_RUNTIME_USER};
pub use error::OrchestratorError;
pub use instance::{InstanceInfo, ProxyInfo};
pub use process::STOP_GRACE;

use crate::control::{
    ControlClient, ControlEndpoint, CADDYFILE_CONTENT_TYPE, TELEMETRY_TIMEOUT,
};
use crate::fs::write_atomic;
use crate::provision::{ProgressFn, Provisioner};
use crate::render::{render_proxy, render_runtime, NoTls, RenderContext, TlsSource};
use crate::sites::SiteSource;
use instance::{ProxyInstance, RuntimeInstance, Supervised};
use process::{launch, reap_stale, remove_pid_file, terminate, write_pid_file, Launch};

/// Pause between stop and start on restart
pub const RESTART_SETTLE: Duration = Duration::from_millis(500);

const PROXY_LABEL: &str = "proxy";

struct State {
    runtimes: BTreeMap<String, RuntimeInstance>,
    proxy: ProxyInstance,
    /// Resolved lazily on first start unless prepared explicitly
    credentials: Option<Credentials>,
}

pub struct Orchestrator {
    config: ArcSwap<Config>,
    sites: Arc<dyn SiteSource>,
    tls: Arc<dyn TlsSource>,
    provisioner: Option<Arc<Provisioner>>,
    state: RwLock<State>,
    stop_grace: Duration,
    settle_delay: Duration,
}

fn runtime_label(version: &str) -> String {
    format!("php-{version}")
}

impl Orchestrator {
    pub fn new(config: Config, sites: Arc<dyn SiteSource>) -> Self {
        let runtimes = config
            .enabled_runtimes()
            .map(|spec| (spec.version.clone(), new_runtime(&config, spec.clone())))
            .collect();
        let proxy = ProxyInstance {
            config: config.proxy.clone(),
            process: Supervised::new(config.paths.proxy_pid_file()),
        };

        Self {
            config: ArcSwap::from_pointee(config),
            sites,
            tls: Arc::new(NoTls),
            provisioner: None,
            state: RwLock::new(State {
                runtimes,
                proxy,
                credentials: None,
            }),
            stop_grace: STOP_GRACE,
            settle_delay: RESTART_SETTLE,
        }
    }

    /// Certificates attached to proxy site blocks
    pub fn with_tls(mut self, tls: Arc<dyn TlsSource>) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Time between SIGTERM and SIGKILL on stop
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Versions under supervision
    pub async fn versions(&self) -> Vec<String> {
        self.state.read().await.runtimes.keys().cloned().collect()
    }

    // =========================================================================
    // Fleet operations
    // =========================================================================

    /// Start every runtime, then the proxy. Every item is attempted.
    pub async fn start_all(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        let config = self.config.load_full();
        let mut failures = Vec::new();

        let versions: Vec<String> = state.runtimes.keys().cloned().collect();
        for version in versions {
            if let Err(e) = self.start_locked(&mut state, &config, &version).await {
                error!(version = %version, error = %e, "Failed to start runtime");
                failures.push((runtime_label(&version), e.to_string()));
            }
        }

        if let Err(e) = self.start_proxy_locked(&mut state, &config).await {
            error!(error = %e, "Failed to start proxy");
            failures.push((PROXY_LABEL.to_string(), e.to_string()));
        }

        OrchestratorError::from_failures(failures)
    }

    /// Stop the proxy, then every runtime
    pub async fn stop_all(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        info!("Stopping all processes");

        stop_process(&mut state.proxy.process, PROXY_LABEL, self.stop_grace).await;

        for (version, instance) in state.runtimes.iter_mut() {
            stop_process(&mut instance.process, &runtime_label(version), self.stop_grace).await;
        }
        Ok(())
    }

    /// Push fresh configuration to every running runtime, then the proxy
    pub async fn reload_all(&self) -> Result<(), OrchestratorError> {
        let state = self.state.write().await;
        let config = self.config.load_full();
        let mut failures = Vec::new();

        for (version, instance) in &state.runtimes {
            if !instance.process.is_running() {
                continue;
            }
            if let Err(e) = self.reload_runtime(&config, instance).await {
                error!(version = %version, error = %e, "Failed to reload runtime");
                failures.push((runtime_label(version), e.to_string()));
            }
        }

        if state.proxy.process.is_running() {
            if let Err(e) = self.reload_proxy_instance(&config, &state.proxy).await {
                error!(error = %e, "Failed to reload proxy");
                failures.push((PROXY_LABEL.to_string(), e.to_string()));
            }
        }

        OrchestratorError::from_failures(failures)
    }

    // =========================================================================
    // Runtime operations
    // =========================================================================

    pub async fn start(&self, version: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        let config = self.config.load_full();
        self.start_locked(&mut state, &config, version).await
    }

    /// Stop a runtime. Stopping a stopped runtime is a no-op.
    pub async fn stop(&self, version: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        let instance = state
            .runtimes
            .get_mut(version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))?;
        stop_process(&mut instance.process, &runtime_label(version), self.stop_grace).await;
        Ok(())
    }

    pub async fn restart(&self, version: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        let config = self.config.load_full();

        let instance = state
            .runtimes
            .get_mut(version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))?;
        stop_process(&mut instance.process, &runtime_label(version), self.stop_grace).await;

        tokio::time::sleep(self.settle_delay).await;
        self.start_locked(&mut state, &config, version).await
    }

    /// Re-render and push without restarting the process
    pub async fn reload(&self, version: &str) -> Result<(), OrchestratorError> {
        let state = self.state.write().await;
        let config = self.config.load_full();
        let instance = state
            .runtimes
            .get(version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))?;
        self.reload_runtime(&config, instance).await
    }

    pub async fn restart_workers(&self, version: &str) -> Result<(), OrchestratorError> {
        let state = self.state.read().await;
        let config = self.config.load_full();
        let instance = state
            .runtimes
            .get(version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))?;
        let label = runtime_label(version);
        if !instance.process.is_running() {
            return Err(OrchestratorError::NotRunning(label));
        }

        let endpoint = ControlEndpoint::for_runtime(config.transport, &config.paths, &instance.spec);
        ControlClient::new(endpoint)
            .restart_workers()
            .await
            .map_err(|e| OrchestratorError::control(&label, e))?;
        info!(version, "Workers restarted");
        Ok(())
    }

    // =========================================================================
    // Proxy operations
    // =========================================================================

    pub async fn start_proxy(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        let config = self.config.load_full();
        self.start_proxy_locked(&mut state, &config).await
    }

    pub async fn stop_proxy(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().await;
        stop_process(&mut state.proxy.process, PROXY_LABEL, self.stop_grace).await;
        Ok(())
    }

    pub async fn reload_proxy(&self) -> Result<(), OrchestratorError> {
        let state = self.state.write().await;
        let config = self.config.load_full();
        self.reload_proxy_instance(&config, &state.proxy).await
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Every supervised runtime, with advisory thread counts
    pub async fn status(&self) -> Vec<InstanceInfo> {
        let config = self.config.load_full();
        let ctx = match self.sites.sites().await {
            Ok(sites) => RenderContext::new(&config, sites),
            Err(e) => {
                warn!(error = %e, "Site source unavailable, reporting zero sites");
                RenderContext::new(&config, Vec::new())
            }
        };

        let mut reports: Vec<(InstanceInfo, Option<ControlEndpoint>)> = {
            let state = self.state.read().await;
            state
                .runtimes
                .values()
                .map(|instance| {
                    let info =
                        InstanceInfo::from_instance(instance, ctx.site_count(&instance.spec.version));
                    let endpoint = instance.process.is_running().then(|| {
                        ControlEndpoint::for_runtime(config.transport, &config.paths, &instance.spec)
                    });
                    (info, endpoint)
                })
                .collect()
        };

        for (info, endpoint) in &mut reports {
            let Some(endpoint) = endpoint.take() else {
                continue;
            };
            match ControlClient::new(endpoint)
                .with_timeout(TELEMETRY_TIMEOUT)
                .threads()
                .await
            {
                Ok(threads) => info.threads = threads.threads,
                Err(e) => debug!(version = %info.version, error = %e, "Thread telemetry unavailable"),
            }
        }

        reports.into_iter().map(|(info, _)| info).collect()
    }

    pub async fn instance(&self, version: &str) -> Result<InstanceInfo, OrchestratorError> {
        self.status()
            .await
            .into_iter()
            .find(|info| info.version == version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))
    }

    pub async fn proxy_status(&self) -> ProxyInfo {
        ProxyInfo::from_instance(&self.state.read().await.proxy)
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    /// Check every child without blocking.
    ///
    /// Processes that exited on their own are marked `error`; returns their
    /// labels.
    pub async fn supervise(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut crashed = Vec::new();

        for (version, instance) in state.runtimes.iter_mut() {
            let label = runtime_label(version);
            if check_exited(&mut instance.process, &label) {
                crashed.push(label);
            }
        }
        if check_exited(&mut state.proxy.process, PROXY_LABEL) {
            crashed.push(PROXY_LABEL.to_string());
        }

        crashed
    }

    /// Run [`Orchestrator::supervise`] every `interval`
    pub fn spawn_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let crashed = orchestrator.supervise().await;
                if !crashed.is_empty() {
                    warn!(crashed = ?crashed, "Supervised processes exited unexpectedly");
                }
            }
        })
    }

    // =========================================================================
    // Configuration and setup
    // =========================================================================

    /// Swap in a re-read configuration.
    ///
    /// Known versions get their new spec (a running process keeps its old
    /// ports until restarted), newly enabled versions are added stopped, and
    /// versions no longer enabled are stopped and dropped.
    pub async fn apply_config(&self, new: Config) -> Result<(), OrchestratorError> {
        new.validate()?;

        let mut state = self.state.write().await;
        let enabled: BTreeMap<String, RuntimeVersionSpec> = new
            .enabled_runtimes()
            .map(|spec| (spec.version.clone(), spec.clone()))
            .collect();

        let removed: Vec<String> = state
            .runtimes
            .keys()
            .filter(|version| !enabled.contains_key(*version))
            .cloned()
            .collect();
        for version in removed {
            if let Some(mut instance) = state.runtimes.remove(&version) {
                stop_process(&mut instance.process, &runtime_label(&version), self.stop_grace).await;
                info!(version = %version, "Runtime removed from supervision");
            }
        }

        for (version, spec) in enabled {
            match state.runtimes.get_mut(&version) {
                Some(instance) => {
                    if instance.spec != spec && instance.process.is_running() {
                        warn!(version = %version, "Runtime settings changed; restart to apply them");
                    }
                    instance.spec = spec;
                }
                None => {
                    info!(version = %version, "Runtime added to supervision");
                    state.runtimes.insert(version, new_runtime(&new, spec));
                }
            }
        }

        if state.proxy.config != new.proxy && state.proxy.process.is_running() {
            warn!("Proxy ports changed; restart the proxy to apply them");
        }
        state.proxy.config = new.proxy.clone();

        let previous = self.config.load_full();
        if previous.runtime_user != new.runtime_user {
            state.credentials = None;
        }

        self.config.store(Arc::new(new));
        info!(runtimes = state.runtimes.len(), "Configuration applied");
        Ok(())
    }

    /// Install any missing runtime binaries
    pub async fn ensure_binaries(
        &self,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let config = self.config.load_full();
        let specs: Vec<RuntimeVersionSpec> = config.enabled_runtimes().cloned().collect();

        let provisioner = match &self.provisioner {
            Some(provisioner) => Arc::clone(provisioner),
            None => Arc::new(Provisioner::new(config.provisioning.clone())?),
        };
        Ok(provisioner.ensure_binaries(&specs, progress).await?)
    }

    /// Make sure the runtime account exists and decide who children run as.
    ///
    /// With a helper configured the account is created through it first.
    pub async fn prepare_runtime_account(&self) -> Result<Credentials, OrchestratorError> {
        let config = self.config.load_full();
        let username = config.runtime_user.as_str();

        if let Some(socket) = &config.helper.socket {
            let helper = HelperClient::new(socket, Duration::from_secs(config.helper.timeout_secs));
            let account = helper
                .ensure_service_account(username, &[])
                .await
                .map_err(|e| OrchestratorError::Account {
                    username: username.to_string(),
                    reason: e.to_string(),
                })?;
            info!(
                username = %account.username,
                uid = account.uid,
                gid = account.gid,
                created = account.created,
                "Runtime account ready"
            );
        }

        let credentials = Credentials::resolve(username)?;
        self.state.write().await.credentials = Some(credentials.clone());
        Ok(credentials)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn render_context(&self, config: &Config) -> Result<RenderContext, OrchestratorError> {
        let sites = self.sites.sites().await?;
        let ctx = RenderContext::new(config, sites).with_tls(self.tls.tls_assignments());
        ctx.validate()?;
        Ok(ctx)
    }

    async fn start_locked(
        &self,
        state: &mut State,
        config: &Config,
        version: &str,
    ) -> Result<(), OrchestratorError> {
        let credentials = credentials_for(state, config)?;
        let label = runtime_label(version);
        let instance = state
            .runtimes
            .get_mut(version)
            .ok_or_else(|| OrchestratorError::UnknownVersion(version.to_string()))?;

        if instance.process.is_running() {
            debug!(version, "Runtime already running");
            return Ok(());
        }

        let ctx = self.render_context(config).await?;
        let text = render_runtime(&ctx, &instance.spec)?;
        let config_file = config.paths.runtime_config_file(version);
        write_atomic(&config_file, text.as_bytes(), Some(0o644))
            .map_err(|e| OrchestratorError::io(&config_file, e))?;

        let log_dir = config.paths.runtime_log_dir(version);
        credentials.prepare_dir(&log_dir)?;
        if config.transport == Transport::Unix {
            credentials.prepare_dir(&config.paths.socket_dir)?;
        }
        create_dir(&config.paths.run_dir())?;

        reap_stale(
            &instance.process.pid_file,
            &label,
            &[instance.spec.binary.as_path(), config_file.as_path()],
            self.stop_grace,
        )
        .await;

        let spawned = launch(&Launch {
            label: &label,
            binary: &instance.spec.binary,
            config_file: &config_file,
            log_file: log_dir.join("frankenphp.log"),
            credentials: &credentials,
        });
        record_spawn(&mut instance.process, &label, spawned)?;
        info!(version, port = instance.spec.port, sites = ctx.site_count(version), "Runtime started");
        Ok(())
    }

    async fn start_proxy_locked(
        &self,
        state: &mut State,
        config: &Config,
    ) -> Result<(), OrchestratorError> {
        if state.proxy.process.is_running() {
            debug!("Proxy already running");
            return Ok(());
        }

        let binary = config
            .proxy_binary()
            .ok_or(OrchestratorError::NoProxyBinary)?;

        let ctx = self.render_context(config).await?;
        let text = render_proxy(&ctx, &state.proxy.config)?;
        let config_file = config.paths.proxy_config_file();
        write_atomic(&config_file, text.as_bytes(), Some(0o644))
            .map_err(|e| OrchestratorError::io(&config_file, e))?;

        create_dir(&config.paths.log_dir)?;
        create_dir(&config.paths.run_dir())?;
        if config.transport == Transport::Unix {
            create_dir(&config.paths.socket_dir)?;
        }

        let proxy = &mut state.proxy;
        reap_stale(
            &proxy.process.pid_file,
            PROXY_LABEL,
            &[binary.as_path(), config_file.as_path()],
            self.stop_grace,
        )
        .await;

        // The proxy binds privileged ports, so it keeps the current identity
        let spawned = launch(&Launch {
            label: PROXY_LABEL,
            binary: &binary,
            config_file: &config_file,
            log_file: config.paths.log_dir.join("proxy-process.log"),
            credentials: &Credentials::Inherit,
        });
        record_spawn(&mut proxy.process, PROXY_LABEL, spawned)?;
        info!(
            http_port = proxy.config.http_port,
            https_port = proxy.config.https_port,
            "Proxy started"
        );
        Ok(())
    }

    async fn reload_runtime(
        &self,
        config: &Config,
        instance: &RuntimeInstance,
    ) -> Result<(), OrchestratorError> {
        let version = instance.spec.version.as_str();
        let label = runtime_label(version);
        if !instance.process.is_running() {
            return Err(OrchestratorError::NotRunning(label));
        }

        let ctx = self.render_context(config).await?;
        let text = render_runtime(&ctx, &instance.spec)?;
        let endpoint = ControlEndpoint::for_runtime(config.transport, &config.paths, &instance.spec);

        push_config(&label, &config.paths.runtime_config_file(version), &text, endpoint).await?;
        info!(version, sites = ctx.site_count(version), "Runtime reloaded");
        Ok(())
    }

    async fn reload_proxy_instance(
        &self,
        config: &Config,
        proxy: &ProxyInstance,
    ) -> Result<(), OrchestratorError> {
        if !proxy.process.is_running() {
            return Err(OrchestratorError::NotRunning(PROXY_LABEL.to_string()));
        }

        let ctx = self.render_context(config).await?;
        let text = render_proxy(&ctx, &proxy.config)?;
        let endpoint =
            ControlEndpoint::for_proxy(config.transport, &config.paths, proxy.config.admin_port);

        push_config(PROXY_LABEL, &config.paths.proxy_config_file(), &text, endpoint).await?;
        info!("Proxy reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("data_dir", &self.config.load().paths.data_dir)
            .field("stop_grace", &self.stop_grace)
            .field("provisioner", &self.provisioner.is_some())
            .finish()
    }
}

fn new_runtime(config: &Config, spec: RuntimeVersionSpec) -> RuntimeInstance {
    RuntimeInstance {
        process: Supervised::new(config.paths.runtime_pid_file(&spec.version)),
        spec,
    }
}

fn credentials_for(state: &mut State, config: &Config) -> Result<Credentials, OrchestratorError> {
    if let Some(credentials) = &state.credentials {
        return Ok(credentials.clone());
    }
    let credentials = Credentials::resolve(&config.runtime_user)?;
    state.credentials = Some(credentials.clone());
    Ok(credentials)
}

fn create_dir(dir: &Path) -> Result<(), OrchestratorError> {
    std::fs::create_dir_all(dir).map_err(|e| OrchestratorError::io(dir, e))
}

/// Record a spawn attempt. Failure leaves the instance in `error`.
fn record_spawn(
    process: &mut Supervised,
    label: &str,
    spawned: Result<tokio::process::Child, OrchestratorError>,
) -> Result<(), OrchestratorError> {
    match spawned {
        Ok(child) => {
            let pid = child.id();
            process.mark_running(child);
            if let Some(pid) = pid {
                if let Err(e) = write_pid_file(&process.pid_file, pid) {
                    warn!(target_name = label, error = %e, "Failed to write PID file");
                }
            }
            Ok(())
        }
        Err(e) => {
            process.mark_error(e.to_string());
            Err(e)
        }
    }
}

/// Stop if running; always ends in `stopped` with no PID file
async fn stop_process(process: &mut Supervised, label: &str, grace: Duration) {
    if let Some(child) = process.child.as_mut() {
        terminate(child, label, grace).await;
    } else {
        debug!(target_name = label, "Not running, nothing to stop");
    }
    remove_pid_file(&process.pid_file);
    process.mark_stopped();
}

/// True when the child has exited since the last check
fn check_exited(process: &mut Supervised, label: &str) -> bool {
    let Some(child) = process.child.as_mut() else {
        return false;
    };
    match child.try_wait() {
        Ok(Some(status)) => {
            error!(target_name = label, status = %status, "Process exited unexpectedly");
            remove_pid_file(&process.pid_file);
            process.mark_error(format!("exited unexpectedly: {status}"));
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(target_name = label, error = %e, "Failed to poll process");
            false
        }
    }
}

/// Write `text` beside `live`, push it, and only then make it the live file.
///
/// A rejected push leaves the previous file untouched.
async fn push_config(
    label: &str,
    live: &Path,
    text: &str,
    endpoint: ControlEndpoint,
) -> Result<(), OrchestratorError> {
    use std::io::Write;

    let dir = live
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_dir(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".keel-staged-")
        .tempfile_in(dir)
        .map_err(|e| OrchestratorError::io(dir, e))?;
    staged
        .write_all(text.as_bytes())
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| OrchestratorError::io(staged.path(), e))?;

    ControlClient::new(endpoint)
        .load(text, CADDYFILE_CONTENT_TYPE)
        .await
        .map_err(|e| OrchestratorError::control(label, e))?;

    staged
        .persist(live)
        .map_err(|e| OrchestratorError::io(live, e.error))?;
    Ok(())
}
