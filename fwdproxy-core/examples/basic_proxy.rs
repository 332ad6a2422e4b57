/// Basic forwarding proxy
///
/// Runs the proxy on port 8080 with a configuration built in code.
///
/// Run with: cargo run -p fwdproxy-core --example basic_proxy
/// Try it:   curl -x http://127.0.0.1:8080 http://example.com/
use fwdproxy_config::{Config, DEFAULT_PROXY_NAME, Limits, Metrics, Timeouts};
use fwdproxy_core::{BoxError, run_proxy};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config {
        listen_addrs: vec!["127.0.0.1:8080".to_string()],
        timeouts: Timeouts {
            connect: 5,
            headers: 10,
            idle: 120,
        },
        metrics: Metrics::default(),
        limits: Limits::default(),
        proxy_name: DEFAULT_PROXY_NAME.to_string(),
        allowlist: None,
        max_connections: Some(1024),
    };
    config.validate()?;

    println!("Forwarding proxy listening on 127.0.0.1:8080");
    println!("Press Ctrl+C to stop");

    run_proxy(config, None).await
}
