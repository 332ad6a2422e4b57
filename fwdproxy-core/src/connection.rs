use crate::http::HttpError;
use crate::line_reader::LineReader;
use crate::relay::{self, Direction, RelayCounters, RelayEnd};
use crate::rewrite::{self, RewrittenRequest};
use crate::upstream::{self, UpstreamError};
use fwdproxy_config::{Config, is_host_allowed};
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, error, info, warn};

/// Failure of one proxied connection, before or while relaying.
#[derive(Debug)]
pub enum ProxyError {
    Headers(HttpError),
    Upstream(UpstreamError),
    /// Writing the rewritten header block to the upstream failed.
    Forward(std::io::Error),
    /// The relay stopped on a read or write error in either direction.
    Relay(Direction, std::io::Error),
}

impl ProxyError {
    /// Label used for the `error_type` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Headers(HttpError::Timeout) => "header_timeout",
            ProxyError::Headers(HttpError::InvalidHost(_)) => "invalid_host",
            ProxyError::Headers(_) => "headers",
            ProxyError::Upstream(UpstreamError::EmptyHost) => "missing_host",
            ProxyError::Upstream(UpstreamError::NotAllowed(_)) => "not_allowed",
            ProxyError::Upstream(UpstreamError::Resolve(_))
            | ProxyError::Upstream(UpstreamError::NoAddresses(_)) => "resolve",
            ProxyError::Upstream(_) => "connect",
            ProxyError::Forward(_) => "forward",
            ProxyError::Relay(..) => "relay",
        }
    }

    /// True when the client, not the upstream or the proxy, caused the failure.
    fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProxyError::Headers(_)
                | ProxyError::Upstream(UpstreamError::EmptyHost)
                | ProxyError::Upstream(UpstreamError::NotAllowed(_))
        )
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Headers(e) => write!(f, "{}", e),
            ProxyError::Upstream(e) => write!(f, "{}", e),
            ProxyError::Forward(e) => write!(f, "Failed to forward request headers: {}", e),
            ProxyError::Relay(dir, e) => write!(f, "Relay {} error: {}", dir.as_str(), e),
        }
    }
}

impl Error for ProxyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProxyError::Headers(e) => Some(e),
            ProxyError::Upstream(e) => Some(e),
            ProxyError::Forward(e) | ProxyError::Relay(_, e) => Some(e),
        }
    }
}

impl From<HttpError> for ProxyError {
    fn from(err: HttpError) -> Self {
        ProxyError::Headers(err)
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        ProxyError::Upstream(err)
    }
}

#[derive(Clone)]
pub struct ConnectionHandler {
    config: Arc<Config>,
    metrics: Option<Arc<ConnectionMetrics>>,
}

struct ConnectionMetrics {
    bytes_transferred: IntCounterVec,
    connections_total: IntCounterVec,
    connections_active: IntGauge,
    connection_duration: Histogram,
    errors_total: IntCounterVec,
}

impl ConnectionMetrics {
    fn new(registry: &Registry) -> prometheus::Result<Self> {
        let bytes_transferred = IntCounterVec::new(
            Opts::new(
                "fwdproxy_bytes_transferred_total",
                "Total bytes relayed per direction",
            ),
            &["direction"],
        )?;
        registry.register(Box::new(bytes_transferred.clone()))?;

        let connections_total = IntCounterVec::new(
            Opts::new(
                "fwdproxy_connections_total",
                "Total number of connections handled",
            ),
            &["status"],
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = IntGauge::new(
            "fwdproxy_connections_active",
            "Number of currently active connections",
        )?;
        registry.register(Box::new(connections_active.clone()))?;

        let connection_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fwdproxy_connection_duration_seconds",
                "Connection duration in seconds",
            )
            .buckets(vec![
                0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0,
            ]),
        )?;
        registry.register(Box::new(connection_duration.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("fwdproxy_errors_total", "Total number of errors by type"),
            &["error_type"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            bytes_transferred,
            connections_total,
            connections_active,
            connection_duration,
            errors_total,
        })
    }
}

impl ConnectionHandler {
    pub fn new(config: Arc<Config>, registry: Option<&Registry>) -> prometheus::Result<Self> {
        let metrics = match registry {
            Some(r) => Some(Arc::new(ConnectionMetrics::new(r)?)),
            None => None,
        };

        Ok(Self { config, metrics })
    }

    /// Handles one accepted client stream end to end.
    ///
    /// Returns only once the connection has fully terminated. Failures are
    /// logged and counted here; the client is closed without a response.
    pub async fn handle_connection<S>(&self, client: S, client_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = client_addr.to_string();
        let start_time = Instant::now();

        if let Some(ref metrics) = self.metrics {
            metrics.connections_active.inc();
        }

        debug!(peer, "New connection");

        let result = self.process_connection(client, client_addr).await;
        let duration = start_time.elapsed().as_secs_f64();

        if let Some(ref metrics) = self.metrics {
            metrics.connections_active.dec();
            metrics.connection_duration.observe(duration);

            let status = if result.is_ok() { "success" } else { "failure" };
            metrics.connections_total.with_label_values(&[status]).inc();
        }

        match result {
            Ok(()) => debug!(peer, duration_secs = %duration, "Connection completed"),
            Err(e) => {
                if e.is_client_error() {
                    debug!(peer, error = %e, duration_secs = %duration, "Client request rejected");
                } else if matches!(e, ProxyError::Upstream(_)) {
                    warn!(peer, error = %e, duration_secs = %duration, "Upstream unavailable");
                } else if matches!(e, ProxyError::Relay(..)) {
                    warn!(peer, error = %e, duration_secs = %duration, "Relay aborted");
                } else {
                    error!(peer, error = %e, duration_secs = %duration, "Connection error");
                }

                if let Some(ref metrics) = self.metrics {
                    metrics.errors_total.with_label_values(&[e.kind()]).inc();
                }
            }
        }
    }

    async fn process_connection<S>(
        &self,
        client: S,
        client_addr: SocketAddr,
    ) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = LineReader::new(
            BufReader::new(client),
            self.config.limits.max_header_bytes,
        );

        let request = self
            .read_request(&mut reader, &client_addr.ip().to_canonical().to_string())
            .await?;
        let target = &request.target;

        debug!(
            host = %target.host,
            port = target.port,
            header_bytes = reader.consumed(),
            "Parsed request headers"
        );

        if let Some(ref allowlist) = self.config.allowlist
            && !target.host.is_empty()
            && !is_host_allowed(&target.host, allowlist)
        {
            return Err(UpstreamError::NotAllowed(target.host.clone()).into());
        }

        let connect_timeout = Duration::from_secs(self.config.timeouts.connect);
        let mut server = upstream::connect_upstream(target, connect_timeout).await?;

        server
            .write_all(&request.bytes)
            .await
            .map_err(ProxyError::Forward)?;

        info!(
            peer = %client_addr,
            upstream = %target,
            "Relaying connection"
        );

        let counters = self
            .metrics
            .as_ref()
            .map(|m| RelayCounters {
                tx: Some(
                    m.bytes_transferred
                        .with_label_values(&[Direction::ClientToUpstream.as_str()]),
                ),
                rx: Some(
                    m.bytes_transferred
                        .with_label_values(&[Direction::UpstreamToClient.as_str()]),
                ),
            })
            .unwrap_or_default();

        // Body bytes read along with the headers are still buffered in the
        // BufReader and reach the upstream ahead of later client bytes.
        let idle_timeout = Duration::from_secs(self.config.timeouts.idle);
        let stats = relay::relay(reader.into_inner(), server, idle_timeout, counters).await;

        debug!(
            sent = stats.client_to_upstream,
            received = stats.upstream_to_client,
            end = %stats.end,
            "Relay totals"
        );

        match stats.end {
            RelayEnd::Error(direction, e) => Err(ProxyError::Relay(direction, e)),
            RelayEnd::Eof(_) | RelayEnd::IdleTimeout => Ok(()),
        }
    }

    async fn read_request<R>(
        &self,
        reader: &mut LineReader<R>,
        client_address: &str,
    ) -> Result<RewrittenRequest, HttpError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let pending = rewrite::rewrite_request(reader, client_address, &self.config.proxy_name);
        match self.config.timeouts.headers {
            0 => pending.await,
            secs => timeout(Duration::from_secs(secs), pending).await?,
        }
    }
}
