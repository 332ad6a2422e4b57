pub mod connection;
pub mod http;
pub mod line_reader;
pub mod relay;
pub mod rewrite;
pub mod upstream;

pub use connection::{ConnectionHandler, ProxyError};
pub use http::{HttpError, ParsedTarget};
pub use line_reader::LineReader;
pub use relay::{RelayCounters, RelayEnd, RelayStats, relay};
pub use rewrite::{HeaderRewriter, RewrittenRequest, rewrite_request};
pub use upstream::{UpstreamError, connect_upstream};

use fwdproxy_config::Config;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pause after a failed accept before polling the listener again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Logs an accept failure and waits out [`ACCEPT_ERROR_BACKOFF`].
///
/// `EMFILE` and similar errors persist until some connection closes.
pub async fn accept_error_backoff(context: &str, err: &std::io::Error) {
    error!(error = %err, "{} accept error", context);
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Binds every configured listener and proxies until Ctrl-C.
pub async fn run_proxy(
    config: Config,
    registry: Option<Registry>,
) -> Result<(), BoxError> {
    let mut listeners: Vec<TcpListener> = Vec::new();
    for addr_str in &config.listen_addrs {
        let addr: SocketAddr = addr_str.parse()?;
        info!("Starting listener on {}", addr);
        listeners.push(TcpListener::bind(addr).await?);
    }

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    serve(listeners, config, registry.as_ref(), shutdown).await?;

    info!("Shutting down proxy");
    Ok(())
}

/// Accepts on already-bound listeners until `shutdown` resolves.
///
/// Every accepted connection runs in its own task; accept errors are logged
/// and the loop keeps going. Connections still in flight when `shutdown`
/// fires are left to finish on their own.
pub async fn serve<F>(
    listeners: Vec<TcpListener>,
    config: Config,
    registry: Option<&Registry>,
    shutdown: F,
) -> Result<(), BoxError>
where
    F: Future<Output = ()>,
{
    let limit = config.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    let handler = ConnectionHandler::new(Arc::new(config), registry)?;

    info!("Proxy started, waiting for connections...");

    tokio::pin!(shutdown);
    loop {
        // Hold a permit before accepting so a saturated proxy stops pulling
        // connections off the backlog.
        let permit = match &limit {
            Some(semaphore) => tokio::select! {
                _ = &mut shutdown => break,
                permit = semaphore.clone().acquire_owned() => Some(permit?),
            },
            None => None,
        };

        let mut accepts = FuturesUnordered::new();
        for listener in &listeners {
            accepts.push(listener.accept());
        }

        tokio::select! {
            _ = &mut shutdown => break,
            Some(result) = accepts.next() => {
                match result {
                    Ok((socket, addr)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler.handle_connection(socket, addr).await;
                            drop(permit);
                        });
                    }
                    Err(e) => accept_error_backoff("Proxy", &e).await,
                }
            }
        }
    }

    Ok(())
}
