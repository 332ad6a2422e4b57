use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Name advertised in the `X-Forwarded-By` header when none is configured.
pub const DEFAULT_PROXY_NAME: &str = "fwdproxy";

/// fwdproxy configuration loaded from YAML.
///
/// Only `listen_addrs` is required; every other section falls back to its
/// defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// List of addresses to listen on (e.g., "0.0.0.0:80", "[::]:80")
    pub listen_addrs: Vec<String>,
    /// Timeout configuration for the connection phases
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Prometheus metrics configuration
    #[serde(default)]
    pub metrics: Metrics,
    /// Size limits applied while reading request headers
    #[serde(default)]
    pub limits: Limits,
    /// Value of the `X-Forwarded-By` header added to every forwarded request
    #[serde(default = "default_proxy_name")]
    pub proxy_name: String,
    /// Optional list of allowed upstream hosts (supports wildcards like "*.example.com")
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Maximum number of concurrently handled connections (unbounded if not specified)
    #[serde(default)]
    pub max_connections: Option<usize>,
}

fn default_proxy_name() -> String {
    DEFAULT_PROXY_NAME.to_string()
}

/// Timeout settings for proxy operations (all values in seconds, `0` disables).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Maximum time to establish the upstream connection (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,
    /// Maximum time to receive the complete request header block (default: 10s)
    #[serde(default = "default_headers_timeout")]
    pub headers: u64,
    /// Maximum time without traffic in either relay direction (default: 300s)
    #[serde(default = "default_idle_timeout")]
    pub idle: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_headers_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            headers: default_headers_timeout(),
            idle: default_idle_timeout(),
        }
    }
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Whether to enable metrics collection
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind metrics HTTP server (e.g., "127.0.0.1:9000")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

fn default_metrics_address() -> String {
    "127.0.0.1:9000".to_string()
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

/// Request header limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum size of the request header block in bytes (default: 32768)
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

fn default_max_header_bytes() -> usize {
    32768
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

/// Errors produced while loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml_ng::Error),
    NoListenAddrs,
    InvalidListenAddr(String),
    InvalidMetricsAddr(String),
    InvalidProxyName,
    ZeroHeaderLimit,
    ZeroMaxConnections,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::NoListenAddrs => write!(f, "At least one listen address is required"),
            ConfigError::InvalidListenAddr(addr) => {
                write!(f, "Invalid listen address: {}", addr)
            }
            ConfigError::InvalidMetricsAddr(addr) => {
                write!(f, "Invalid metrics address: {}", addr)
            }
            ConfigError::InvalidProxyName => {
                write!(f, "proxy_name must be non-empty and contain no control characters")
            }
            ConfigError::ZeroHeaderLimit => write!(f, "limits.max_header_bytes must be positive"),
            ConfigError::ZeroMaxConnections => write!(f, "max_connections must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fwdproxy_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::from_file(Path::new("config.yaml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses and validates configuration from a YAML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use fwdproxy_config::Config;
    ///
    /// let yaml = r#"
    /// listen_addrs:
    ///   - "0.0.0.0:80"
    /// proxy_name: "edge-1"
    /// "#;
    ///
    /// let config = Config::parse(yaml).unwrap();
    /// assert_eq!(config.listen_addrs[0], "0.0.0.0:80");
    /// assert_eq!(config.proxy_name, "edge-1");
    /// assert_eq!(config.timeouts.idle, 300);
    /// ```
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addrs.is_empty() {
            return Err(ConfigError::NoListenAddrs);
        }
        for addr in &self.listen_addrs {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::InvalidListenAddr(addr.clone()));
            }
        }
        if self.metrics.enabled && self.metrics.address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidMetricsAddr(
                self.metrics.address.clone(),
            ));
        }
        // The name is written verbatim into a header line.
        if self.proxy_name.is_empty() || self.proxy_name.chars().any(|c| c.is_control()) {
            return Err(ConfigError::InvalidProxyName);
        }
        if self.limits.max_header_bytes == 0 {
            return Err(ConfigError::ZeroHeaderLimit);
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::ZeroMaxConnections);
        }
        Ok(())
    }
}

/// Checks if a hostname matches an allowlist pattern.
///
/// Supports wildcard patterns for flexible domain matching:
/// - Exact match: `"example.com"` matches only `"example.com"`
/// - Subdomain wildcard: `"*.example.com"` matches `"api.example.com"`, `"www.example.com"`, and `"example.com"`
/// - Suffix wildcard: `"*api.com"` matches `"api.com"`, `"testapi.com"`, etc.
///
/// # Examples
///
/// ```
/// use fwdproxy_config::matches_allowlist_pattern;
///
/// assert!(matches_allowlist_pattern("example.com", "example.com"));
/// assert!(matches_allowlist_pattern("api.example.com", "*.example.com"));
/// assert!(matches_allowlist_pattern("example.com", "*.example.com"));
/// assert!(matches_allowlist_pattern("myapi.com", "*api.com"));
/// ```
pub fn matches_allowlist_pattern(hostname: &str, pattern: &str) -> bool {
    if pattern == hostname {
        return true;
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        hostname.ends_with(&format!(".{}", domain)) || hostname == domain
    } else if let Some(suffix) = pattern.strip_prefix("*") {
        hostname.ends_with(suffix)
    } else {
        false
    }
}

/// Checks a hostname against a whole allowlist, case-insensitively.
///
/// A lone `"*"` entry allows every host.
pub fn is_host_allowed(hostname: &str, allowlist: &[String]) -> bool {
    if allowlist.iter().any(|pattern| pattern == "*") {
        return true;
    }

    let host_lower = hostname.to_lowercase();
    allowlist
        .iter()
        .any(|pattern| matches_allowlist_pattern(&host_lower, &pattern.to_lowercase()))
}
