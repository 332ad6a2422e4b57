use fwdproxy_config::{Config, ConfigError};
use std::path::PathBuf;

fn get_test_config_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // Go to workspace root
    path.push("test_configs");
    path.push(filename);
    path
}

#[test]
fn test_minimal_config_loads() {
    let config = Config::from_file(&get_test_config_path("test_minimal.yaml"))
        .expect("Failed to load minimal config");

    assert_eq!(config.listen_addrs, vec!["127.0.0.1:18080"]);

    // Everything else comes from defaults
    assert_eq!(config.timeouts.connect, 10);
    assert_eq!(config.timeouts.headers, 10);
    assert_eq!(config.timeouts.idle, 300);
    assert!(!config.metrics.enabled);
    assert_eq!(config.proxy_name, "fwdproxy");
    assert!(config.allowlist.is_none());
    assert!(config.max_connections.is_none());
}

#[test]
fn test_basic_config_loads() {
    let config = Config::from_file(&get_test_config_path("test_basic.yaml"))
        .expect("Failed to load basic config");

    assert_eq!(config.listen_addrs.len(), 2);
    assert_eq!(config.listen_addrs[0], "0.0.0.0:8080");
    assert_eq!(config.listen_addrs[1], "0.0.0.0:8081");

    assert_eq!(config.timeouts.connect, 10);
    assert_eq!(config.timeouts.headers, 5);
    assert_eq!(config.timeouts.idle, 300);

    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.address, "0.0.0.0:9091");

    assert_eq!(config.limits.max_header_bytes, 32768);
    assert!(config.allowlist.is_none());
}

#[test]
fn test_full_config_loads() {
    let config = Config::from_file(&get_test_config_path("test_full.yaml"))
        .expect("Failed to load full config");

    assert_eq!(config.listen_addrs, vec!["0.0.0.0:80", "[::]:80"]);
    assert_eq!(config.timeouts.connect, 3);
    assert_eq!(config.timeouts.headers, 8);
    assert_eq!(config.timeouts.idle, 120);
    assert_eq!(config.metrics.address, "127.0.0.1:9091");
    assert_eq!(config.limits.max_header_bytes, 16384);
    assert_eq!(config.proxy_name, "fwdproxy-edge");
    assert_eq!(config.max_connections, Some(50000));

    let allowlist = config.allowlist.expect("Allowlist should be configured");
    assert_eq!(allowlist.len(), 2);
    assert_eq!(allowlist[0], "example.com");
    assert_eq!(allowlist[1], "*.test.com");
}

#[test]
fn test_example_config_loads() {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path.push("config.example.yaml");

    let config = Config::from_file(&path).expect("Failed to load example config");
    assert_eq!(config.listen_addrs, vec!["0.0.0.0:80"]);
    assert_eq!(config.proxy_name, "fwdproxy");
    assert!(config.allowlist.is_none());
}

#[test]
fn test_invalid_listen_addr_file_rejected() {
    let result = Config::from_file(&get_test_config_path("test_invalid.yaml"));
    match result {
        Err(ConfigError::InvalidListenAddr(addr)) => assert_eq!(addr, "not-an-address"),
        other => panic!("Expected InvalidListenAddr, got: {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let result = Config::from_file(&get_test_config_path("does_not_exist.yaml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_config_invalid_yaml() {
    let yaml = r#"
listen_addrs: [invalid
timeouts:
  - invalid
"#;

    let result = Config::parse(yaml);
    assert!(
        matches!(result, Err(ConfigError::Parse(_))),
        "Should fail on invalid YAML"
    );
}

#[test]
fn test_config_wrong_field_type() {
    let yaml = r#"
listen_addrs:
  - "0.0.0.0:8080"
timeouts:
  connect: "ten"
"#;

    assert!(Config::parse(yaml).is_err());
}

#[test]
fn test_error_display() {
    assert_eq!(
        ConfigError::NoListenAddrs.to_string(),
        "At least one listen address is required"
    );
    assert_eq!(
        ConfigError::InvalidListenAddr("x".to_string()).to_string(),
        "Invalid listen address: x"
    );
}
