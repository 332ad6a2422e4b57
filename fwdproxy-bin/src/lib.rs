use bytes::Bytes;
use fwdproxy_config::Config;
use fwdproxy_core::{BoxError, accept_error_backoff, run_proxy};
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub async fn run(config_path: &Path) -> Result<(), BoxError> {
    init_logging()?;

    let config = Config::from_file(config_path)?;
    info!(
        config = %config_path.display(),
        listeners = config.listen_addrs.len(),
        "Configuration loaded"
    );

    let registry = if config.metrics.enabled {
        let registry = Registry::new();
        let metrics_addr: SocketAddr = config.metrics.address.parse()?;
        let metrics_listener = TcpListener::bind(metrics_addr).await?;
        info!("Serving metrics on {}", metrics_addr);

        tokio::spawn(serve_metrics(metrics_listener, registry.clone()));
        Some(registry)
    } else {
        None
    };

    run_proxy(config, registry).await
}

/// JSON logs filtered by `RUST_LOG`, defaulting to info.
pub fn init_logging() -> Result<(), BoxError> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("fwdproxy_core=debug".parse()?),
        )
        .with_target(false)
        .json()
        .try_init()?;
    Ok(())
}

/// Serves the prometheus text exposition of `registry` on every request.
pub async fn serve_metrics(listener: TcpListener, registry: Registry) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                accept_error_backoff("Metrics", &e).await;
                continue;
            }
        };

        let registry = registry.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |_req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move {
                    let body = render_metrics(&registry)?;
                    let mut response = Response::new(Full::new(Bytes::from(body)));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    Ok::<_, String>(response)
                }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server error: {}", err);
            }
        });
    }
}

pub fn render_metrics(registry: &Registry) -> Result<Vec<u8>, String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Metrics encoding error: {}", e))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[test]
    fn test_render_metrics_includes_registered_counter() {
        let registry = Registry::new();
        let counter = IntCounter::new("fwdproxy_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let text = String::from_utf8(render_metrics(&registry).unwrap()).unwrap();
        assert!(text.contains("# HELP fwdproxy_test_total test counter"));
        assert!(text.contains("fwdproxy_test_total 3"));
    }

    #[test]
    fn test_render_empty_registry() {
        let registry = Registry::new();
        assert!(render_metrics(&registry).unwrap().is_empty());
    }
}
