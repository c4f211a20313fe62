//! Client for the local control API of runtime and proxy processes.
//!
//! Every FrankenPHP/Caddy process exposes an admin endpoint on a loopback
//! port or a unix socket. Keel uses three calls:
//!
//! - `POST /load` with `Content-Type: text/caddyfile` to apply configuration
//! - `POST /frankenphp/workers/restart` to cycle PHP workers
//! - `GET /frankenphp/threads` for advisory thread counts
//!
//! Requests are plain HTTP/1.1 over a fresh connection per call.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use keel_config::{PathsConfig, RuntimeVersionSpec, Transport};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, trace};

/// Content type FrankenPHP/Caddy expect for Caddyfile text
pub const CADDYFILE_CONTENT_TYPE: &str = "text/caddyfile";

/// Timeout for configuration pushes and worker restarts
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for advisory telemetry
pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest response body kept in error messages
const MAX_ERROR_BODY: usize = 4096;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot connect to control endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control request timed out after {0:?}")]
    Timeout(Duration),

    #[error("control endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("HTTP error talking to control endpoint: {0}")]
    Transport(#[from] hyper::Error),

    #[error("failed to build control request: {0}")]
    Request(#[from] http::Error),

    #[error("unexpected control response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Where a process's control API listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl ControlEndpoint {
    pub fn localhost(port: u16) -> Self {
        ControlEndpoint::Tcp {
            host: "localhost".to_string(),
            port,
        }
    }

    /// Control endpoint of a runtime under the given transport
    pub fn for_runtime(transport: Transport, paths: &PathsConfig, spec: &RuntimeVersionSpec) -> Self {
        match transport {
            Transport::Tcp => Self::localhost(spec.admin_port),
            Transport::Unix => ControlEndpoint::Unix(paths.runtime_admin_socket(&spec.version)),
        }
    }

    /// Control endpoint of the edge proxy under the given transport
    pub fn for_proxy(transport: Transport, paths: &PathsConfig, admin_port: u16) -> Self {
        match transport {
            Transport::Tcp => Self::localhost(admin_port),
            Transport::Unix => ControlEndpoint::Unix(paths.proxy_admin_socket()),
        }
    }

    /// Value for the `admin` global option of a Caddyfile
    pub fn caddy_admin_address(&self) -> String {
        match self {
            ControlEndpoint::Tcp { host, port } => format!("{host}:{port}"),
            ControlEndpoint::Unix(path) => format!("unix/{}", path.display()),
        }
    }

    fn host_header(&self) -> String {
        match self {
            ControlEndpoint::Tcp { host, port } => format!("{host}:{port}"),
            ControlEndpoint::Unix(_) => "localhost".to_string(),
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEndpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            ControlEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Thread report from `GET /frankenphp/threads`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    pub threads: usize,
    pub reserved: usize,
}

#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    #[serde(rename = "ThreadDebugStates", alias = "Threads", default)]
    threads: Vec<serde_json::Value>,
    #[serde(rename = "ReservedThreadCount", default)]
    reserved: usize,
}

/// Control API client for one process
#[derive(Debug, Clone)]
pub struct ControlClient {
    endpoint: ControlEndpoint,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(endpoint: ControlEndpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }

    /// Apply new configuration text. Non-2xx responses carry the body.
    pub async fn load(&self, config: &str, content_type: &str) -> Result<(), ControlError> {
        let request = self
            .request(Method::POST, "/load")
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::copy_from_slice(config.as_bytes())))?;

        self.expect_success(request).await?;
        debug!(endpoint = %self.endpoint, bytes = config.len(), "Configuration loaded");
        Ok(())
    }

    /// Cycle PHP workers without restarting the process
    pub async fn restart_workers(&self) -> Result<(), ControlError> {
        let request = self
            .request(Method::POST, "/frankenphp/workers/restart")
            .body(Full::new(Bytes::new()))?;
        self.expect_success(request).await?;
        Ok(())
    }

    /// Current thread counts
    pub async fn threads(&self) -> Result<ThreadInfo, ControlError> {
        let request = self
            .request(Method::GET, "/frankenphp/threads")
            .body(Full::new(Bytes::new()))?;
        let body = self.expect_success(request).await?;
        let parsed: ThreadsResponse = serde_json::from_slice(&body)?;
        Ok(ThreadInfo {
            threads: parsed.threads.len(),
            reserved: parsed.reserved,
        })
    }

    fn request(&self, method: Method, path: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, self.endpoint.host_header())
    }

    async fn expect_success(&self, request: Request<Full<Bytes>>) -> Result<Bytes, ControlError> {
        let (status, body) = self.send(request).await?;
        if status.is_success() {
            return Ok(body);
        }
        let mut text = String::from_utf8_lossy(&body).trim().to_string();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Err(ControlError::Status { status, body: text })
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), ControlError> {
        trace!(
            endpoint = %self.endpoint,
            method = %request.method(),
            path = %request.uri(),
            "Control request"
        );

        let exchange = async {
            match &self.endpoint {
                ControlEndpoint::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|source| self.connect_error(source))?;
                    exchange(stream, request).await
                }
                ControlEndpoint::Unix(path) => {
                    let stream = UnixStream::connect(path)
                        .await
                        .map_err(|source| self.connect_error(source))?;
                    exchange(stream, request).await
                }
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))?
    }

    fn connect_error(&self, source: std::io::Error) -> ControlError {
        ControlError::Connect {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }
}

async fn exchange<S>(stream: S, request: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), ControlError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!(error = %e, "Control connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}
