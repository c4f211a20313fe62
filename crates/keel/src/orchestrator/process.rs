//! Spawning, signalling and reaping supervised processes.
//!
//! Every child gets its own process group so a stop reaches the workers it
//! forked as well.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::{Credentials, OrchestratorError};
use crate::fs::{remove_if_exists, write_atomic};

/// How long a process gets between SIGTERM and SIGKILL
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Everything needed to start one Caddy-compatible process
#[derive(Debug, Clone)]
pub(crate) struct Launch<'a> {
    pub label: &'a str,
    pub binary: &'a Path,
    pub config_file: &'a Path,
    pub log_file: PathBuf,
    pub credentials: &'a Credentials,
}

/// `<binary> run --config <file> --adapter caddyfile`, output appended to the log file
pub(crate) fn launch(spec: &Launch<'_>) -> Result<Child, OrchestratorError> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_file)
        .map_err(|e| OrchestratorError::io(&spec.log_file, e))?;
    let log_err = log
        .try_clone()
        .map_err(|e| OrchestratorError::io(&spec.log_file, e))?;

    let mut command = Command::new(spec.binary);
    command
        .arg("run")
        .arg("--config")
        .arg(spec.config_file)
        .arg("--adapter")
        .arg("caddyfile")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .kill_on_drop(false);

    if let Credentials::Switch { uid, gid, .. } = spec.credentials {
        command.uid(*uid).gid(*gid);
    }

    let child = command.spawn().map_err(|source| OrchestratorError::Spawn {
        binary: spec.binary.to_path_buf(),
        source,
    })?;

    info!(
        target_name = spec.label,
        pid = child.id(),
        binary = %spec.binary.display(),
        config = %spec.config_file.display(),
        user = %spec.credentials.describe(),
        "Process started"
    );
    Ok(child)
}

/// Signal a whole process group, treating "no such process" as done
fn signal_group(pid: u32, signal: Signal) -> Result<(), Errno> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(Errno::EINVAL);
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// SIGTERM the child's group, wait up to `grace`, then SIGKILL
pub(crate) async fn terminate(child: &mut Child, label: &str, grace: Duration) {
    let Some(pid) = child.id() else {
        debug!(target_name = label, "Process already reaped");
        return;
    };

    if let Err(e) = signal_group(pid, Signal::SIGTERM) {
        warn!(target_name = label, pid, error = %e, "Failed to send SIGTERM");
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(target_name = label, pid, status = %status, "Process stopped");
        }
        Ok(Err(e)) => {
            warn!(target_name = label, pid, error = %e, "Failed to wait for process");
        }
        Err(_) => {
            warn!(
                target_name = label,
                pid,
                grace_secs = grace.as_secs(),
                "Process did not exit after SIGTERM, escalating to SIGKILL"
            );
            if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                warn!(target_name = label, pid, error = %e, "Failed to send SIGKILL");
            }
            if let Err(e) = child.kill().await {
                debug!(target_name = label, pid, error = %e, "Kill after SIGKILL failed");
            }
        }
    }
}

pub(crate) fn write_pid_file(path: &Path, pid: u32) -> Result<(), OrchestratorError> {
    write_atomic(path, format!("{pid}\n").as_bytes(), Some(0o644))
        .map_err(|e| OrchestratorError::io(path, e))
}

pub(crate) fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .filter(|pid| *pid > 1)
}

pub(crate) fn remove_pid_file(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove PID file");
    }
}

pub(crate) fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether `pid` still looks like a process we launched.
///
/// A PID file can outlive the process it names, so on Linux the command line
/// must mention one of `markers` (the binary or its config file). Elsewhere
/// the PID is trusted.
fn is_ours(pid: u32, markers: &[&Path]) -> bool {
    if !cfg!(target_os = "linux") {
        return true;
    }
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(raw) => {
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            markers
                .iter()
                .any(|marker| cmdline.contains(&*marker.to_string_lossy()))
        }
        Err(_) => false,
    }
}

/// Stop a process left behind by an earlier run, then drop its PID file.
///
/// Only processes whose command line matches `markers` are signalled.
pub(crate) async fn reap_stale(pid_file: &Path, label: &str, markers: &[&Path], grace: Duration) {
    let Some(pid) = read_pid_file(pid_file) else {
        remove_pid_file(pid_file);
        return;
    };

    if is_alive(pid) {
        if !is_ours(pid, markers) {
            warn!(
                target_name = label,
                pid,
                "PID file names an unrelated process, leaving it alone"
            );
            remove_pid_file(pid_file);
            return;
        }

        warn!(target_name = label, pid, "Stopping stale process from a previous run");
        if let Err(e) = signal_group(pid, Signal::SIGTERM) {
            warn!(target_name = label, pid, error = %e, "Failed to signal stale process");
        }

        let deadline = Instant::now() + grace;
        while is_alive(pid) && Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
        }
        if is_alive(pid) {
            if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                warn!(target_name = label, pid, error = %e, "Failed to send SIGKILL to stale process");
            }
        }
    }

    remove_pid_file(pid_file);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/php-8.4.pid");

        write_pid_file(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242\n");
        assert_eq!(read_pid_file(&path), Some(4242));

        remove_pid_file(&path);
        assert_eq!(read_pid_file(&path), None);
    }

    #[test]
    fn test_garbage_pid_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid_file(&path), None);
        std::fs::write(&path, "1").unwrap();
        assert_eq!(read_pid_file(&path), None);
    }

    #[test]
    fn test_self_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[tokio::test]
    async fn test_terminate_stops_process_group() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        terminate(&mut child, "test", Duration::from_secs(5)).await;

        assert!(child.try_wait().unwrap().is_some());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_sigkill() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; while true; do sleep 0.1; done")
            .process_group(0)
            .spawn()
            .unwrap();

        let started = Instant::now();
        terminate(&mut child, "stubborn", Duration::from_millis(300)).await;

        assert!(child.try_wait().unwrap().is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reap_stale_kills_and_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("stale.pid");
        let config = dir.path().join("Caddyfile.php-8.4");
        // Two commands keep sh from exec'ing, so the config path stays in argv
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("sleep 30; : {}", config.display()))
            .process_group(0)
            .spawn()
            .unwrap();
        write_pid_file(&pid_file, child.id().unwrap()).unwrap();

        reap_stale(&pid_file, "stale", &[config.as_path()], Duration::from_millis(500)).await;

        assert!(!pid_file.exists());
        let status = timeout(Duration::from_secs(5), child.wait()).await;
        assert!(status.is_ok());
    }

    #[tokio::test]
    async fn test_reap_stale_escalates_to_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("stale.pid");
        let config = dir.path().join("Caddyfile.proxy");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!(
                "trap '' TERM; while true; do sleep 0.1; done; : {}",
                config.display()
            ))
            .process_group(0)
            .spawn()
            .unwrap();
        write_pid_file(&pid_file, child.id().unwrap()).unwrap();

        reap_stale(&pid_file, "stubborn", &[config.as_path()], Duration::from_millis(300)).await;

        assert!(!pid_file.exists());
        let status = timeout(Duration::from_secs(5), child.wait()).await;
        assert!(status.is_ok(), "stale process survived SIGKILL");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_reap_stale_spares_unrelated_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("stale.pid");
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        write_pid_file(&pid_file, pid).unwrap();

        let config = dir.path().join("Caddyfile.php-8.4");
        reap_stale(&pid_file, "stale", &[config.as_path()], Duration::from_millis(200)).await;

        assert!(!pid_file.exists());
        assert!(is_alive(pid));
        child.kill().await.unwrap();
    }
}
