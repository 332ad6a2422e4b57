use crate::http::ParsedTarget;
use std::error::Error;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::{Duration, timeout};
use tracing::debug;

#[derive(Debug)]
pub enum UpstreamError {
    /// No `Host` header was seen, so there is nothing to resolve.
    EmptyHost,
    NotAllowed(String),
    Resolve(io::Error),
    NoAddresses(String),
    Connect(SocketAddr, io::Error),
    ConnectTimeout(SocketAddr),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::EmptyHost => write!(f, "No upstream host in request"),
            UpstreamError::NotAllowed(host) => write!(f, "Host not in allowlist: {}", host),
            UpstreamError::Resolve(e) => write!(f, "Failed to resolve upstream: {}", e),
            UpstreamError::NoAddresses(host) => write!(f, "No addresses found for {}", host),
            UpstreamError::Connect(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            UpstreamError::ConnectTimeout(addr) => write!(f, "Connect to {} timed out", addr),
        }
    }
}

impl Error for UpstreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UpstreamError::Resolve(e) | UpstreamError::Connect(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Resolves the target and opens a single TCP connection to it.
///
/// Only the first resolved address is tried. A zero `connect_timeout`
/// waits for the OS connect timeout instead.
pub async fn connect_upstream(
    target: &ParsedTarget,
    connect_timeout: Duration,
) -> Result<TcpStream, UpstreamError> {
    if target.host.is_empty() {
        return Err(UpstreamError::EmptyHost);
    }

    debug!(host = %target.host, port = target.port, "Resolving upstream");
    let addr = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(UpstreamError::Resolve)?
        .next()
        .ok_or_else(|| UpstreamError::NoAddresses(target.host.clone()))?;

    debug!(%addr, "Connecting to upstream");
    let connect = TcpStream::connect(addr);
    let result = if connect_timeout.is_zero() {
        connect.await
    } else {
        timeout(connect_timeout, connect)
            .await
            .map_err(|_| UpstreamError::ConnectTimeout(addr))?
    };

    result.map_err(|e| UpstreamError::Connect(addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn target(host: &str, port: u16) -> ParsedTarget {
        ParsedTarget {
            host: host.to_string(),
            port,
            port_string: port.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_host_rejected() {
        let result = connect_upstream(&ParsedTarget::default(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(UpstreamError::EmptyHost)));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let result = connect_upstream(
            &target("does-not-exist.invalid", 80),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(UpstreamError::Resolve(_)) | Err(UpstreamError::NoAddresses(_))
        ));
    }

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_upstream(&target("127.0.0.1", port), Duration::from_secs(2))
            .await
            .unwrap();
        let (_accepted, peer) = listener.accept().await.unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_upstream(&target("127.0.0.1", port), Duration::ZERO).await;
        assert!(matches!(result, Err(UpstreamError::Connect(_, _))));
    }

    #[test]
    fn test_upstream_error_display() {
        assert_eq!(
            UpstreamError::EmptyHost.to_string(),
            "No upstream host in request"
        );
        assert_eq!(
            UpstreamError::NotAllowed("evil.test".to_string()).to_string(),
            "Host not in allowlist: evil.test"
        );
    }
}
