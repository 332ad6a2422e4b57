/// Configuration loading
///
/// Parses configuration from YAML, applies defaults, and shows how
/// validation and allowlist matching behave.
///
/// Run with: cargo run -p fwdproxy-config --example config_loading
use fwdproxy_config::{Config, is_host_allowed, matches_allowlist_pattern};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("1. Minimal configuration with defaults:");
    let config = Config::parse("listen_addrs: [\"0.0.0.0:8080\"]")?;
    println!("   listen addresses: {:?}", config.listen_addrs);
    println!(
        "   timeouts: connect={}s headers={}s idle={}s",
        config.timeouts.connect, config.timeouts.headers, config.timeouts.idle
    );
    println!("   max header bytes: {}", config.limits.max_header_bytes);
    println!("   proxy name: {}", config.proxy_name);

    println!("\n2. Full configuration:");
    let yaml = r#"
listen_addrs:
  - "0.0.0.0:80"
  - "[::]:80"
timeouts:
  connect: 5
  headers: 0
  idle: 600
metrics:
  enabled: true
  address: "127.0.0.1:9000"
proxy_name: "edge-1"
allowlist:
  - "example.com"
  - "*.internal.example.com"
max_connections: 2048
"#;
    let config = Config::parse(yaml)?;
    println!("   header timeout disabled: {}", config.timeouts.headers == 0);
    println!("   metrics on {}", config.metrics.address);
    if let Some(ref allowlist) = config.allowlist {
        for host in ["example.com", "api.internal.example.com", "example.org"] {
            println!("   {} allowed: {}", host, is_host_allowed(host, allowlist));
        }
    }

    println!("\n3. Pattern matching:");
    for (host, pattern) in [
        ("example.com", "example.com"),
        ("a.b.example.org", "*.example.org"),
        ("example.org", "*.example.org"),
    ] {
        println!(
            "   '{}' vs '{}' = {}",
            host,
            pattern,
            matches_allowlist_pattern(host, pattern)
        );
    }

    println!("\n4. Loading from file:");
    let path = Path::new("config.example.yaml");
    match Config::from_file(path) {
        Ok(config) => println!("   loaded {} ({:?})", path.display(), config.listen_addrs),
        Err(e) => println!("   could not load {}: {}", path.display(), e),
    }

    println!("\n5. Rejected configurations:");
    for yaml in [
        "listen_addrs: []",
        "listen_addrs: [\"not-an-address\"]",
        "listen_addrs: [\"0.0.0.0:80\"]\nmax_connections: 0",
    ] {
        match Config::parse(yaml) {
            Ok(_) => println!("   unexpectedly accepted: {:?}", yaml),
            Err(e) => println!("   rejected: {}", e),
        }
    }

    Ok(())
}
