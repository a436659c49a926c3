//! Best-effort discovery of the host's public IP address.
//!
//! Called once after the room starts so the admin can tell remote peers
//! where to connect.  [`HttpIpResolver`] asks a short list of plain-HTTP
//! "what is my IP" services in order and returns the first usable answer.
//! Failure is never fatal for the room itself.

use std::time::Duration;

use async_trait::async_trait;
use lanchat_core::net::{self, Context};
use lanchat_core::{ErrorBatch, ErrorCode, RecvOutcome, RetryPolicy, Severity};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Services queried by default, in order.
pub const DEFAULT_IP_SERVICES: [&str; 3] =
    ["api.ipify.org", "ifconfig.me", "checkip.amazonaws.com"];

/// Plain-HTTP port.
pub const HTTP_PORT: u16 = 80;

/// Longest textual IP address accepted (a full IPv6 address with an
/// embedded IPv4 suffix).
pub const MAX_IP_TEXT_LEN: usize = 45;

/// Longest one service may take, from resolving its name to the end of its
/// response.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the HTTP response read from a service.
const MAX_RESPONSE_BYTES: usize = 4096;

/// Error type for public IP discovery.
#[derive(Debug, Error)]
pub enum PublicIpError {
    /// Every service failed; the batch holds one or more reasons per service.
    #[error("no public IP service answered:\n{0}")]
    Unavailable(ErrorBatch),
}

/// Source of the host's externally visible address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn discover_public_ip(&self) -> Result<String, PublicIpError>;
}

/// Queries plain-HTTP IP echo services over the resilient socket layer.
#[derive(Debug, Clone)]
pub struct HttpIpResolver {
    services: Vec<String>,
    port: u16,
    retry: RetryPolicy,
    query_timeout: Duration,
}

impl Default for HttpIpResolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_IP_SERVICES.iter().map(|s| s.to_string()).collect(),
            HTTP_PORT,
            RetryPolicy::default(),
        )
    }
}

impl HttpIpResolver {
    pub fn new(services: Vec<String>, port: u16, retry: RetryPolicy) -> Self {
        Self {
            services,
            port,
            retry,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Replaces [`DEFAULT_QUERY_TIMEOUT`].
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    async fn query(&self, host: &str, batch: &mut ErrorBatch) -> Option<String> {
        let addr = net::resolve(host, self.port, batch).await.ok()?;
        let mut stream = net::connect(addr, &self.retry, batch).await.ok()?;

        let request = format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        if net::send(&mut stream, request.as_bytes(), Context::Client, batch)
            .await
            .is_err()
        {
            let _ = net::close(&mut stream, &self.retry, batch).await;
            return None;
        }

        let mut response = vec![0u8; MAX_RESPONSE_BYTES];
        let mut filled = 0;
        while filled < response.len() {
            match net::recv(&mut stream, &mut response[filled..], Context::Client, batch).await {
                RecvOutcome::Data(n) => filled += n,
                RecvOutcome::Closed => break,
                RecvOutcome::Failed(_) => {
                    let _ = net::close(&mut stream, &self.retry, batch).await;
                    return None;
                }
            }
        }
        let _ = net::close(&mut stream, &self.retry, batch).await;

        extract_ip(&String::from_utf8_lossy(&response[..filled]), batch)
    }
}

#[async_trait]
impl PublicIpResolver for HttpIpResolver {
    async fn discover_public_ip(&self) -> Result<String, PublicIpError> {
        let mut batch = ErrorBatch::new();
        for host in &self.services {
            debug!(%host, "querying public IP service");
            let answer = timeout(self.query_timeout, self.query(host, &mut batch)).await;
            match answer {
                Ok(Some(ip)) => {
                    info!(%host, %ip, "public IP discovered");
                    return Ok(ip);
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(%host, "public IP service timed out");
                    batch.add(
                        ErrorCode::TimedOut,
                        Severity::Critical,
                        format!("{host} did not answer in time"),
                        "public-ip",
                    );
                }
            }
        }
        Err(PublicIpError::Unavailable(batch))
    }
}

/// Pulls the trimmed body out of an HTTP response and checks its length.
fn extract_ip(response: &str, batch: &mut ErrorBatch) -> Option<String> {
    let Some((_, body)) = response.split_once("\r\n\r\n") else {
        batch.add(
            ErrorCode::NoResponseBody,
            Severity::Critical,
            "No response body in HTTP response",
            "public-ip",
        );
        return None;
    };

    let ip = body.trim();
    if ip.is_empty() {
        batch.add(
            ErrorCode::NoResponseBody,
            Severity::Critical,
            "Empty response body in HTTP response",
            "public-ip",
        );
        return None;
    }
    if ip.len() > MAX_IP_TEXT_LEN {
        batch.add(
            ErrorCode::IpTooLong,
            Severity::Critical,
            "Received IP is too long",
            "public-ip",
        );
        return None;
    }
    Some(ip.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
