//! HTTP-01 challenge tokens and the temporary responder that serves them.
//!
//! The responder answers `GET /.well-known/acme-challenge/<token>` with the
//! key authorization registered for the token, and 404 for anything else.
//! It only lives for the duration of one issuance.

use bytes::Bytes;
use dashmap::DashMap;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending token -> key authorization pairs
#[derive(Debug, Clone, Default)]
pub struct ChallengeStore {
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed HTTP-01 challenge");
        }
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.challenges.get(token).map(|v| v.clone())
    }

    pub fn pending(&self) -> usize {
        self.challenges.len()
    }

    /// Token from a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|t| !t.is_empty() && !t.contains('/'))
    }

    fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        let found = (method == Method::GET || method == Method::HEAD)
            .then(|| Self::extract_token(path))
            .flatten()
            .and_then(|token| self.get(token));

        let (status, body) = match found {
            Some(key_auth) => {
                trace!(path = %path, "Served HTTP-01 challenge");
                (StatusCode::OK, Bytes::from(key_auth))
            }
            None => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain"),
        );
        response
    }
}

/// A bound HTTP listener answering from a [`ChallengeStore`].
///
/// Stops accepting when dropped.
#[derive(Debug)]
pub struct ChallengeResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ChallengeResponder {
    pub async fn bind(addr: &str, store: ChallengeStore) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "HTTP-01 challenge responder listening");

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        debug!(error = %e, "Challenge responder accept failed");
                        continue;
                    }
                };

                let store = store.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let response = store.respond(req.method(), req.uri().path());
                        async move { Ok::<_, Infallible>(response) }
                    });
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        trace!(peer = %peer, error = %e, "Challenge connection ended with error");
                    }
                });
            }
        });

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ChallengeResponder {
    fn drop(&mut self) {
        self.task.abort();
        debug!(address = %self.local_addr, "HTTP-01 challenge responder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let store = ChallengeStore::new();
        store.add("tok", "tok.thumb");
        assert_eq!(store.get("tok").as_deref(), Some("tok.thumb"));
        assert_eq!(store.pending(), 1);

        store.remove("tok");
        assert_eq!(store.get("tok"), None);
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let store = ChallengeStore::new();
        let clone = store.clone();
        store.add("a", "b");
        assert_eq!(clone.get("a").as_deref(), Some("b"));
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            ChallengeStore::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeStore::extract_token("/.well-known/acme-challenge/"), None);
        assert_eq!(ChallengeStore::extract_token("/.well-known/acme-challenge/a/b"), None);
        assert_eq!(ChallengeStore::extract_token("/index.php"), None);
    }

    #[test]
    fn test_respond() {
        let store = ChallengeStore::new();
        store.add("abc", "abc.key");

        let hit = store.respond(&Method::GET, "/.well-known/acme-challenge/abc");
        assert_eq!(hit.status(), StatusCode::OK);

        let miss = store.respond(&Method::GET, "/.well-known/acme-challenge/zzz");
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);

        let post = store.respond(&Method::POST, "/.well-known/acme-challenge/abc");
        assert_eq!(post.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_responder_serves_tokens() {
        let store = ChallengeStore::new();
        store.add("live-token", "live-token.thumbprint");
        let responder = ChallengeResponder::bind("127.0.0.1:0", store).await.unwrap();

        let base = format!("http://{}", responder.local_addr());
        let body = reqwest::get(format!("{base}/.well-known/acme-challenge/live-token"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "live-token.thumbprint");

        let missing = reqwest::get(format!("{base}/.well-known/acme-challenge/other"))
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);
    }
}
