//! Server side of the helper contract.
//!
//! The production helper is a separate program; this server is the
//! reference implementation it can build on, and what tests run against.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::errors::HelperProtocolError;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    HelperCommand, HelperRequest, HelperResponse, ResourceLimits, ServiceAccount,
    PROTOCOL_VERSION,
};

/// Operations a helper implements. Errors are reported to the caller as text.
#[async_trait]
pub trait HelperHandler: Send + Sync {
    async fn ensure_service_account(
        &self,
        username: &str,
        groups: &[String],
    ) -> Result<ServiceAccount, String>;

    async fn set_resource_limits(&self, username: &str, limits: ResourceLimits)
        -> Result<(), String>;

    async fn verify_password(&self, username: &str, password: &str) -> Result<bool, String>;
}

/// Unix socket server dispatching to a [`HelperHandler`]
pub struct HelperServer {
    socket_path: PathBuf,
    handler: Arc<dyn HelperHandler>,
}

impl HelperServer {
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn HelperHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
        }
    }

    /// Bind the socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener, HelperProtocolError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(path = %self.socket_path.display(), "Helper listening");
        Ok(listener)
    }

    /// Accept connections until the task is dropped
    pub async fn serve(&self, listener: UnixListener) -> Result<(), HelperProtocolError> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler.as_ref()).await {
                            error!(error = %e, "Error handling helper connection");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept helper connection");
                }
            }
        }
    }

    pub async fn run(&self) -> Result<(), HelperProtocolError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    handler: &dyn HelperHandler,
) -> Result<(), HelperProtocolError> {
    let Some(request) = read_frame::<_, HelperRequest>(&mut stream).await? else {
        return Ok(());
    };

    let response = if request.version != PROTOCOL_VERSION {
        warn!(version = request.version, "Helper request with unsupported version");
        HelperResponse::error(
            &request.id,
            format!("unsupported protocol version {}", request.version),
        )
    } else {
        debug!(method = request.command.method(), id = %request.id, "Handling helper request");
        dispatch(&request, handler).await
    };

    write_frame(&mut stream, &response).await
}

async fn dispatch(request: &HelperRequest, handler: &dyn HelperHandler) -> HelperResponse {
    let id = request.id.as_str();
    let result = match &request.command {
        HelperCommand::EnsureServiceAccount { username, groups } => handler
            .ensure_service_account(username, groups)
            .await
            .and_then(|account| serde_json::to_value(account).map_err(|e| e.to_string())),
        HelperCommand::SetResourceLimits { username, limits } => handler
            .set_resource_limits(username, *limits)
            .await
            .map(|()| serde_json::Value::Null),
        HelperCommand::VerifyPassword { username, password } => handler
            .verify_password(username, password)
            .await
            .map(|valid| serde_json::json!({ "valid": valid })),
    };

    match result {
        Ok(value) => HelperResponse::ok(id, value),
        Err(message) => HelperResponse::error(id, message),
    }
}
