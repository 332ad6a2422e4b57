use std::error::Error;
use std::fmt;
use std::io;

pub const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTP_PORT_STR: &str = "80";

#[derive(Debug)]
pub enum HttpError {
    Io(io::Error),
    /// The client closed the stream before the blank line ending the headers.
    IncompleteHeaders,
    HeadersTooLarge,
    InvalidHost(String),
    Timeout,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Io(e) => write!(f, "IO error: {}", e),
            HttpError::IncompleteHeaders => write!(f, "Client closed before end of headers"),
            HttpError::HeadersTooLarge => write!(f, "Request headers too large"),
            HttpError::InvalidHost(host) => write!(f, "Invalid Host header: {}", host),
            HttpError::Timeout => write!(f, "Timed out reading request headers"),
        }
    }
}

impl Error for HttpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HttpError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        HttpError::Io(err)
    }
}

impl From<tokio::time::error::Elapsed> for HttpError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        HttpError::Timeout
    }
}

/// Upstream target taken from a `Host` header value.
///
/// `host` never carries the port suffix or IPv6 brackets. `port_string` is the
/// port exactly as the client wrote it, used when echoing the authority back
/// in `X-Forwarded-Host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    pub host: String,
    pub port: u16,
    pub port_string: String,
}

impl Default for ParsedTarget {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_HTTP_PORT,
            port_string: DEFAULT_HTTP_PORT_STR.to_string(),
        }
    }
}

impl ParsedTarget {
    /// Parses `host[:port]`, splitting at the first colon.
    ///
    /// A bracketed IPv6 literal (`[::1]` or `[::1]:8080`) is split after the
    /// closing bracket instead.
    pub fn parse(value: &str) -> Result<Self, HttpError> {
        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (addr, after) = rest
                .split_once(']')
                .ok_or_else(|| HttpError::InvalidHost(value.to_string()))?;
            let port = match after {
                "" => None,
                _ => Some(
                    after
                        .strip_prefix(':')
                        .ok_or_else(|| HttpError::InvalidHost(value.to_string()))?,
                ),
            };
            (addr, port)
        } else {
            match value.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (value, None),
            }
        };

        match port {
            None => Ok(Self {
                host: host.to_string(),
                ..Self::default()
            }),
            Some(port_str) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| HttpError::InvalidHost(value.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                    port_string: port_str.to_string(),
                })
            }
        }
    }

    /// `host:port_string`, re-bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port_string)
        } else {
            format!("{}:{}", self.host, self.port_string)
        }
    }
}

impl fmt::Display for ParsedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_without_port() {
        let target = ParsedTarget::parse("example.com").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.port_string, "80");
    }

    #[test]
    fn test_parse_host_with_port() {
        let target = ParsedTarget::parse("example.com:8080").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 8080);
        assert_eq!(target.authority(), "example.com:8080");
    }

    #[test]
    fn test_parse_keeps_literal_port_text() {
        let target = ParsedTarget::parse("example.com:0080").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.port_string, "0080");
        assert_eq!(target.authority(), "example.com:0080");
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(matches!(
            ParsedTarget::parse("example.com:http"),
            Err(HttpError::InvalidHost(_))
        ));
        assert!(matches!(
            ParsedTarget::parse("example.com:70000"),
            Err(HttpError::InvalidHost(_))
        ));
        assert!(matches!(
            ParsedTarget::parse("example.com:"),
            Err(HttpError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_parse_ipv6_literal() {
        let target = ParsedTarget::parse("[::1]:8080").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.authority(), "[::1]:8080");

        let target = ParsedTarget::parse("[2001:db8::1]").unwrap();
        assert_eq!(target.host, "2001:db8::1");
        assert_eq!(target.port, 80);
    }

    #[test]
    fn test_parse_malformed_ipv6() {
        assert!(ParsedTarget::parse("[::1").is_err());
        assert!(ParsedTarget::parse("[::1]8080").is_err());
    }

    #[test]
    fn test_default_target_is_empty_host() {
        let target = ParsedTarget::default();
        assert!(target.host.is_empty());
        assert_eq!(target.authority(), ":80");
    }

    #[test]
    fn test_http_error_display() {
        assert_eq!(
            HttpError::IncompleteHeaders.to_string(),
            "Client closed before end of headers"
        );
        assert_eq!(
            HttpError::HeadersTooLarge.to_string(),
            "Request headers too large"
        );
        assert_eq!(
            HttpError::InvalidHost("a:b".to_string()).to_string(),
            "Invalid Host header: a:b"
        );
        assert_eq!(
            HttpError::Timeout.to_string(),
            "Timed out reading request headers"
        );
    }

    #[test]
    fn test_http_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "test");
        let http_error: HttpError = io_error.into();
        assert!(matches!(http_error, HttpError::Io(_)));
    }
}
