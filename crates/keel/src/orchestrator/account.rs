//! The unprivileged account runtimes and the proxy run as.

use std::path::Path;
use tracing::{debug, info, warn};

use super::OrchestratorError;

/// Setting this to `root` keeps child processes running as root
pub const ENV_RUNTIME_USER: &str = "KEEL_RUNTIME_USER";

/// Identity applied to spawned processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Children run as the current user
    Inherit,
    /// Children switch to this account before exec
    Switch { username: String, uid: u32, gid: u32 },
}

impl Credentials {
    /// Work out who children should run as.
    ///
    /// Only a root process on Linux switches; everything else inherits.
    pub fn resolve(username: &str) -> Result<Self, OrchestratorError> {
        let override_user = std::env::var(ENV_RUNTIME_USER).ok();
        resolve_with(
            username,
            nix::unistd::geteuid().is_root(),
            override_user.as_deref(),
            lookup_user,
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Credentials::Inherit => "current user".to_string(),
            Credentials::Switch { username, uid, gid } => format!("{username} ({uid}:{gid})"),
        }
    }

    /// Create `dir` and, when switching, hand it to the runtime account
    pub fn prepare_dir(&self, dir: &Path) -> Result<(), OrchestratorError> {
        std::fs::create_dir_all(dir).map_err(|e| OrchestratorError::io(dir, e))?;

        if let Credentials::Switch { uid, gid, .. } = self {
            use nix::unistd::{chown, Gid, Uid};
            chown(dir, Some(Uid::from_raw(*uid)), Some(Gid::from_raw(*gid)))
                .map_err(|e| OrchestratorError::io(dir, std::io::Error::from(e)))?;
        }
        Ok(())
    }
}

fn lookup_user(username: &str) -> Result<Option<(u32, u32)>, String> {
    nix::unistd::User::from_name(username)
        .map(|user| user.map(|u| (u.uid.as_raw(), u.gid.as_raw())))
        .map_err(|e| e.to_string())
}

fn resolve_with<F>(
    username: &str,
    is_root: bool,
    override_user: Option<&str>,
    lookup: F,
) -> Result<Credentials, OrchestratorError>
where
    F: Fn(&str) -> Result<Option<(u32, u32)>, String>,
{
    if !is_root {
        debug!("Not running as root, children inherit the current user");
        return Ok(Credentials::Inherit);
    }

    if override_user == Some("root") {
        warn!(
            env = ENV_RUNTIME_USER,
            "Runtimes will run as root; this bypasses privilege separation"
        );
        return Ok(Credentials::Inherit);
    }

    if !cfg!(target_os = "linux") {
        warn!(
            username,
            "Credential switching is only supported on Linux, children keep the current user"
        );
        return Ok(Credentials::Inherit);
    }

    match lookup(username) {
        Ok(Some((uid, gid))) => {
            info!(username, uid, gid, "Runtimes will run as dedicated account");
            Ok(Credentials::Switch {
                username: username.to_string(),
                uid,
                gid,
            })
        }
        Ok(None) => Err(OrchestratorError::Account {
            username: username.to_string(),
            reason: "no such user".to_string(),
        }),
        Err(reason) => Err(OrchestratorError::Account {
            username: username.to_string(),
            reason,
        }),
    }
}
