//! Client side of the helper contract.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::errors::HelperProtocolError;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    HelperCommand, HelperOutcome, HelperRequest, HelperResponse, ResourceLimits, ServiceAccount,
    PROTOCOL_VERSION,
};

/// Client for the privileged helper.
///
/// Each call opens a fresh connection, so a wedged call never poisons the
/// next one.
#[derive(Debug, Clone)]
pub struct HelperClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl HelperClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Create the account when missing; returns its ids either way
    pub async fn ensure_service_account(
        &self,
        username: &str,
        groups: &[String],
    ) -> Result<ServiceAccount, HelperProtocolError> {
        self.call(HelperCommand::EnsureServiceAccount {
            username: username.to_string(),
            groups: groups.to_vec(),
        })
        .await
    }

    pub async fn set_resource_limits(
        &self,
        username: &str,
        limits: ResourceLimits,
    ) -> Result<(), HelperProtocolError> {
        let _: serde_json::Value = self
            .call(HelperCommand::SetResourceLimits {
                username: username.to_string(),
                limits,
            })
            .await?;
        Ok(())
    }

    /// True when the password matches
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, HelperProtocolError> {
        #[derive(serde::Deserialize)]
        struct Verified {
            valid: bool,
        }

        let verified: Verified = self
            .call(HelperCommand::VerifyPassword {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        Ok(verified.valid)
    }

    /// Send one command and decode its result
    pub async fn call<T: DeserializeOwned>(
        &self,
        command: HelperCommand,
    ) -> Result<T, HelperProtocolError> {
        let method = command.method();
        let request = HelperRequest::new(command);
        debug!(method, id = %request.id, "Calling helper");

        let response = tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| HelperProtocolError::Timeout(self.timeout))??;

        if response.version != PROTOCOL_VERSION {
            return Err(HelperProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: response.version,
            });
        }
        if response.id != request.id {
            return Err(HelperProtocolError::IdMismatch {
                expected: request.id,
                actual: response.id,
            });
        }

        match response.outcome {
            HelperOutcome::Ok { result } => serde_json::from_value(result)
                .map_err(|e| HelperProtocolError::InvalidMessage(e.to_string())),
            HelperOutcome::Error { message } => Err(HelperProtocolError::Rejected {
                method: method.to_string(),
                message,
            }),
        }
    }

    async fn exchange(&self, request: &HelperRequest) -> Result<HelperResponse, HelperProtocolError> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            HelperProtocolError::ConnectionFailed {
                path: self.socket_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        write_frame(&mut stream, request).await?;
        let response = read_frame(&mut stream)
            .await?
            .ok_or(HelperProtocolError::ConnectionClosed)?;
        // Best effort; the helper may already have closed its side
        let _ = stream.shutdown().await;
        Ok(response)
    }
}
