//! Keel - control core entry point
//!
//! Supervises the runtime fleet and edge proxy, provisions binaries and
//! manages certificates.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use keel::certs::{Certificate, CertificateManager, RenewOutcome, RenewalScheduler};
use keel::reload::{ReloadCoordinator, ReloadHandle, SignalManager, SignalType};
use keel::render::{render_proxy, render_runtime, RenderContext, TlsSource};
use keel::{JsonSiteFile, Orchestrator, Provisioner, SiteSource};
use keel_common::{init_tracing, CertificateId, LogFormat};
use keel_config::validate::validate_config;
use keel_config::{AcmeProvider, Config};

/// How often crashed processes are noticed
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Keel - PHP runtime fleet, edge proxy and certificate control core
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "KEEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format: pretty or json
    #[arg(long = "log-format", default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the fleet and supervise it until SIGTERM (default)
    Run {
        /// Do not download missing runtime binaries
        #[arg(long = "no-provision")]
        no_provision: bool,
    },
    /// Validate configuration and exit
    Test {
        /// Also check that every configured port can be bound
        #[arg(long = "probe-ports")]
        probe_ports: bool,
    },
    /// Download and install missing runtime binaries
    Provision,
    /// Print a rendered Caddyfile
    Render(RenderArgs),
    /// Certificate management
    #[command(subcommand)]
    Certs(CertCommands),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct RenderArgs {
    /// Runtime version to render
    #[arg(long = "runtime")]
    runtime: Option<String>,
    /// Render the edge proxy instead
    #[arg(long = "proxy")]
    proxy: bool,
}

#[derive(Subcommand, Debug)]
enum CertCommands {
    /// List stored certificates
    List {
        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },
    /// Generate a self-signed certificate
    SelfSigned {
        #[arg(long = "site")]
        site: String,
        #[arg(long = "domain")]
        domain: String,
    },
    /// Install operator-supplied PEM files
    Install {
        #[arg(long = "site")]
        site: String,
        #[arg(long = "domain")]
        domain: String,
        #[arg(long = "cert")]
        cert: PathBuf,
        #[arg(long = "key")]
        key: PathBuf,
        #[arg(long = "chain")]
        chain: Option<PathBuf>,
    },
    /// Obtain a certificate from an ACME CA
    Acme {
        #[arg(long = "site")]
        site: String,
        #[arg(long = "domain")]
        domain: String,
        /// Account contact, defaults to admin-email
        #[arg(long = "email")]
        email: Option<String>,
        /// letsencrypt or zerossl, defaults to the configured provider
        #[arg(long = "provider")]
        provider: Option<AcmeProvider>,
    },
    /// Renew one ACME certificate if it is due
    Renew { id: String },
    /// Renew every due ACME certificate
    RenewAll,
    /// Delete a certificate and its files
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    init_tracing(cli.log_format, level).context("Failed to initialise logging")?;

    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or(Commands::Run {
        no_provision: false,
    }) {
        Commands::Run { no_provision } => run(config_path, no_provision).await,
        Commands::Test { probe_ports } => test_config(config_path, probe_ports).await,
        Commands::Provision => provision(config_path).await,
        Commands::Render(args) => render(config_path, args).await,
        Commands::Certs(command) => certs(config_path, command).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Validate configuration and exit
async fn test_config(path: Option<&Path>, probe_ports: bool) -> Result<()> {
    let config = Config::load(path).context("Failed to load configuration")?;
    let result = validate_config(&config, probe_ports).await;

    for warning in &result.warnings {
        warn!("{warning}");
    }
    for error in &result.errors {
        error!("{error}");
    }

    let name = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(embedded)".to_string());
    if !result.is_ok() {
        bail!("configuration {name} has {} error(s)", result.errors.len());
    }

    info!(
        runtimes = config.enabled_runtimes().count(),
        http_port = config.proxy.http_port,
        https_port = config.proxy.https_port,
        "Configuration test successful"
    );
    println!("keel: configuration {name} test is successful");
    Ok(())
}

async fn provision(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let provisioner = Provisioner::new(config.provisioning.clone())
        .context("Failed to set up provisioning")?;
    let specs: Vec<_> = config.enabled_runtimes().cloned().collect();

    // One line per 10%
    let last_decile = AtomicU64::new(u64::MAX);
    let report = |p: keel::provision::DownloadProgress| {
        if let Some(percent) = p.percent() {
            let decile = (percent / 10.0) as u64;
            if last_decile.swap(decile, Ordering::Relaxed) != decile {
                info!(version = %p.version, percent = decile * 10, "Downloading");
            }
        }
    };
    let installed = provisioner
        .ensure_binaries(&specs, Some(&report))
        .await
        .context("Provisioning failed")?;

    if installed.is_empty() {
        println!("All runtime binaries are present");
    } else {
        println!("Installed PHP {}", installed.join(", "));
    }
    Ok(())
}

async fn render(path: Option<&Path>, args: RenderArgs) -> Result<()> {
    let config = load_config(path)?;
    let sites = JsonSiteFile::new(config.sites_file())
        .sites()
        .await
        .context("Failed to read sites")?;
    let certs = CertificateManager::from_config(&config);
    let ctx = RenderContext::new(&config, sites).with_tls(certs.tls_assignments());

    let text = match args.runtime {
        Some(version) => {
            let spec = config
                .runtime(&version)
                .with_context(|| format!("runtime '{version}' is not configured"))?;
            render_runtime(&ctx, spec)?
        }
        None => render_proxy(&ctx, &config.proxy)?,
    };
    print!("{text}");
    Ok(())
}

async fn certs(path: Option<&Path>, command: CertCommands) -> Result<()> {
    let config = load_config(path)?;
    let manager = CertificateManager::from_config(&config);

    match command {
        CertCommands::List { json } => {
            let certs = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&certs)?);
            } else {
                print_table(&certs);
            }
        }
        CertCommands::SelfSigned { site, domain } => {
            let cert = manager.issue_self_signed(&site, &domain)?;
            println!("Created self-signed certificate {} for {}", cert.id, cert.domain);
        }
        CertCommands::Install {
            site,
            domain,
            cert,
            key,
            chain,
        } => {
            let cert_pem = read_pem(&cert)?;
            let key_pem = read_pem(&key)?;
            let chain_pem = chain.as_deref().map(read_pem).transpose()?;
            let cert = manager.install_custom(&site, &domain, &cert_pem, &key_pem, chain_pem.as_deref())?;
            println!(
                "Installed certificate {} for {} (expires {})",
                cert.id,
                cert.domain,
                cert.valid_until.format("%Y-%m-%d")
            );
        }
        CertCommands::Acme {
            site,
            domain,
            email,
            provider,
        } => {
            let email = email
                .or_else(|| config.admin_email.clone())
                .context("no ACME contact: pass --email or set admin-email")?;
            let provider = provider.unwrap_or(config.certificates.provider);
            let cert = manager.issue_acme(&site, &domain, &email, provider).await?;
            println!(
                "Issued {} certificate {} for {} (expires {})",
                provider,
                cert.id,
                cert.domain,
                cert.valid_until.format("%Y-%m-%d")
            );
        }
        CertCommands::Renew { id } => match manager.renew(&CertificateId::from(id)).await? {
            RenewOutcome::NotDue { days_remaining } => {
                println!("Not due for renewal ({days_remaining} days remaining)");
            }
            RenewOutcome::Renewed(cert) => {
                println!("Renewed as {} (expires {})", cert.id, cert.valid_until.format("%Y-%m-%d"));
            }
        },
        CertCommands::RenewAll => {
            manager.mark_expired()?;
            let report = manager.auto_renew().await?;
            println!(
                "{} renewed, {} not due, {} failed",
                report.renewed.len(),
                report.not_due.len(),
                report.failed.len()
            );
            for (id, reason) in &report.failed {
                println!("  {id}: {reason}");
            }
            if !report.is_clean() {
                bail!("{} renewal(s) failed", report.failed.len());
            }
        }
        CertCommands::Delete { id } => {
            manager.delete(&CertificateId::from(id.as_str()))?;
            println!("Deleted certificate {id}");
        }
    }
    Ok(())
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_table(certs: &[Certificate]) {
    if certs.is_empty() {
        println!("No certificates");
        return;
    }
    println!(
        "{:<36}  {:<30}  {:<11}  {:<8}  {:<10}",
        "ID", "DOMAIN", "TYPE", "STATUS", "EXPIRES"
    );
    for cert in certs {
        println!(
            "{:<36}  {:<30}  {:<11}  {:<8}  {:<10}",
            cert.id.as_str(),
            cert.domain,
            cert.cert_type.to_string(),
            cert.status.to_string(),
            cert.valid_until.format("%Y-%m-%d").to_string()
        );
    }
}

/// Start everything and supervise until told to stop
async fn run(path: Option<&Path>, no_provision: bool) -> Result<()> {
    let config = load_config(path)?;

    let findings = validate_config(&config, true).await;
    for warning in &findings.warnings {
        warn!("{warning}");
    }
    if !findings.is_ok() {
        for e in &findings.errors {
            error!("{e}");
        }
        bail!("configuration has {} error(s)", findings.errors.len());
    }

    let sites: Arc<dyn SiteSource> = Arc::new(JsonSiteFile::new(config.sites_file()));
    let certs = Arc::new(CertificateManager::from_config(&config));
    let provisioner = Arc::new(
        Provisioner::new(config.provisioning.clone()).context("Failed to set up provisioning")?,
    );
    let orchestrator = Arc::new(
        Orchestrator::new(config, sites)
            .with_tls(certs.clone())
            .with_provisioner(provisioner),
    );

    let credentials = orchestrator
        .prepare_runtime_account()
        .await
        .context("Failed to prepare the runtime account")?;
    info!(user = %credentials.describe(), "Runtime identity resolved");

    if !no_provision {
        let installed = orchestrator
            .ensure_binaries(None)
            .await
            .context("Failed to provision runtime binaries")?;
        if !installed.is_empty() {
            info!(versions = ?installed, "Runtime binaries installed");
        }
    }

    let mut signals = SignalManager::install().context("Failed to register signal handlers")?;

    if let Err(e) = orchestrator.start_all().await {
        error!(error = %e, "Fleet started with failures");
    }
    for instance in orchestrator.status().await {
        info!(
            version = %instance.version,
            status = %instance.status,
            port = instance.port,
            sites = instance.site_count,
            "Runtime status"
        );
    }
    let proxy = orchestrator.proxy_status().await;
    info!(status = %proxy.status, http_port = proxy.http_port, https_port = proxy.https_port, "Proxy status");

    let watchdog = orchestrator.spawn_watchdog(WATCHDOG_INTERVAL);
    let (reload, reload_rx) = ReloadHandle::channel();
    let coordinator = ReloadCoordinator::new(reload_rx).spawn(orchestrator.clone());
    let scheduler = RenewalScheduler::new(certs).with_reload(reload.clone()).spawn();

    info!("Keel running");
    loop {
        match signals.recv().await {
            Some(SignalType::Reload) => {
                match Config::load(path) {
                    Ok(new) => {
                        if let Err(e) = orchestrator.apply_config(new).await {
                            error!(error = %e, "New configuration rejected, keeping the current one");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to re-read configuration"),
                }
                reload.request("SIGHUP");
            }
            Some(SignalType::Shutdown) | None => break,
        }
    }

    info!("Shutting down");
    scheduler.abort();
    watchdog.abort();
    coordinator.abort();
    drop(reload);

    orchestrator.stop_all().await.context("Shutdown incomplete")?;
    info!("Keel stopped");
    Ok(())
}
