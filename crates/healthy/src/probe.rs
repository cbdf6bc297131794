//! HTTP probe check.
//!
//! [`HttpCheck`] issues a GET request and succeeds when the response status
//! matches the expected code. Requests go over a plain HTTP/1 connection
//! driven by hyper; only `http://` URLs are accepted.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProbeError, TaskError};
use crate::task::Task;

const PROBE_USER_AGENT: &str = concat!("healthy/", env!("CARGO_PKG_VERSION"));

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// A task that makes a GET HTTP request.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    url: String,
    /// `host:port` to connect to.
    address: String,
    /// Value of the `Host` header.
    authority: String,
    path: String,
    name: String,
    expected_status_code: u16,
    timeout: Duration,
}

impl HttpCheck {
    /// Build a check for `url` expecting `expected_status_code`.
    pub fn new(url: &str, expected_status_code: u16) -> Result<Self, ProbeError> {
        let uri: Uri = url.parse().map_err(|source| ProbeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        match uri.scheme_str() {
            Some("http") => {}
            _ => return Err(ProbeError::UnsupportedScheme(url.to_string())),
        }

        let authority = uri
            .authority()
            .ok_or_else(|| ProbeError::MissingHost(url.to_string()))?;
        let host = authority.host();
        if host.is_empty() {
            return Err(ProbeError::MissingHost(url.to_string()));
        }
        let address = format!("{host}:{}", authority.port_u16().unwrap_or(80));
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            url: url.to_string(),
            address,
            authority: authority.as_str().to_string(),
            path,
            name: format!("HTTP check for {}", authority.as_str()),
            expected_status_code,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bound each request by `timeout`. Zero keeps [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expected_status_code(&self) -> u16 {
        self.expected_status_code
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self) -> Result<(), TaskError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(request_failed)?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(request_failed)?;

        // Drive the connection in the background.
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, %url, "probe connection closed with error");
            }
        });

        let req = Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(HOST, self.authority.as_str())
            .header(USER_AGENT, PROBE_USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(|e| TaskError::Other(e.into()))?;

        let resp = sender.send_request(req).await.map_err(request_failed)?;
        let status = resp.status().as_u16();
        if status != self.expected_status_code {
            return Err(TaskError::failed(format!(
                "response code does not match: expected {}, got {status}",
                self.expected_status_code
            )));
        }
        Ok(())
    }
}

fn request_failed(e: impl std::fmt::Display) -> TaskError {
    TaskError::failed(format!("issues performing a request; details: {e}"))
}

#[async_trait]
impl Task for HttpCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        let timeout = self.timeout;
        let probe = async {
            time::timeout(timeout, self.probe())
                .await
                .unwrap_or_else(|_| Err(TaskError::Timeout { timeout }))
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(TaskError::failed("cancelled")),
            result = probe => result,
        }
    }
}
