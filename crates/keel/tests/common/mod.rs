//! Shared fixtures for integration tests.

#![allow(dead_code)]

use keel_common::{Site, SiteStatus};
use keel_config::{Config, PathsConfig};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration rooted in `dir` with the 8.4 runtime enabled.
///
/// `runtime-user` is `root` so credential resolution succeeds whether or not
/// the tests run as root.
pub fn config_in(dir: &Path) -> Config {
    let mut config = Config::default_embedded().unwrap();
    config.paths = PathsConfig {
        data_dir: dir.join("data"),
        log_dir: dir.join("logs"),
        socket_dir: dir.join("sock"),
    };
    config.runtime_user = "root".into();
    config.admin_email = Some("ops@example.com".into());
    config.sites.file = Some(dir.join("sites.json"));
    config
}

/// Executable shell script standing in for the server binary.
///
/// It records its arguments to `<dir>/invocations` and then runs `body`.
pub fn fake_binary(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let log = dir.join("invocations");
    let script = format!("#!/bin/sh\necho \"$@\" >> '{}'\n{body}\n", log.display());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A binary that stays up until signalled
pub fn long_running_binary(dir: &Path) -> PathBuf {
    fake_binary(dir, "frankenphp", "exec sleep 30")
}

pub fn site(id: &str, domain: &str, version: &str, root: &Path) -> Site {
    Site {
        id: id.into(),
        name: id.into(),
        domain: domain.into(),
        aliases: vec![],
        runtime_version: version.into(),
        root_path: root.join(id),
        public_path: "public".into(),
        worker_mode: false,
        worker_file: None,
        worker_num: None,
        status: SiteStatus::Active,
        environment: BTreeMap::new(),
    }
}

/// Poll until `path` exists with non-empty content
pub async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if !text.is_empty() {
                return text;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never appeared", path.display());
}

pub fn is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
