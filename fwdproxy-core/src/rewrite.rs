//! Forwarding-header rewrite of the request header block.

use crate::http::{HttpError, ParsedTarget};
use crate::line_reader::LineReader;
use tokio::io::AsyncBufRead;

const HOST_PREFIX: &[u8] = b"Host: ";
const FORWARDED_FOR_PREFIX: &[u8] = b"X-Forwarded-For: ";
const CRLF: &[u8] = b"\r\n";

/// Header block ready to be written to the upstream, plus its target.
#[derive(Debug, Clone)]
pub struct RewrittenRequest {
    pub target: ParsedTarget,
    pub bytes: Vec<u8>,
}

/// Per-connection rewrite state.
///
/// Lines are pushed in arrival order; every line is copied to the outbound
/// buffer except `X-Forwarded-For`, which is extended with the client
/// address. [`HeaderRewriter::finish`] appends the synthesized trailers and
/// the terminating blank line.
#[derive(Debug)]
pub struct HeaderRewriter {
    client_address: String,
    proxy_name: String,
    forwarded_for_present: bool,
    target: ParsedTarget,
    invalid_host: Option<String>,
    outbound: Vec<u8>,
}

impl HeaderRewriter {
    pub fn new(client_address: impl Into<String>, proxy_name: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            proxy_name: proxy_name.into(),
            forwarded_for_present: false,
            target: ParsedTarget::default(),
            invalid_host: None,
            outbound: Vec::with_capacity(4096),
        }
    }

    /// Classifies one header line (without CRLF) and appends it.
    pub fn push_line(&mut self, line: &[u8]) {
        if let Some(value) = line.strip_prefix(HOST_PREFIX) {
            let value = String::from_utf8_lossy(value);
            // Last Host line wins.
            match ParsedTarget::parse(&value) {
                Ok(target) => {
                    self.target = target;
                    self.invalid_host = None;
                }
                Err(_) => self.invalid_host = Some(value.into_owned()),
            }
            self.outbound.extend_from_slice(line);
        } else if line.starts_with(FORWARDED_FOR_PREFIX) {
            self.forwarded_for_present = true;
            self.outbound.extend_from_slice(line);
            self.outbound.extend_from_slice(b", ");
            self.outbound.extend_from_slice(self.client_address.as_bytes());
        } else {
            self.outbound.extend_from_slice(line);
        }
        self.outbound.extend_from_slice(CRLF);
    }

    /// Appends the trailer headers and the blank line.
    ///
    /// A missing `Host` line is not an error here: the target host stays
    /// empty and upstream resolution rejects it.
    pub fn finish(mut self) -> Result<RewrittenRequest, HttpError> {
        if let Some(host) = self.invalid_host {
            return Err(HttpError::InvalidHost(host));
        }

        if !self.forwarded_for_present {
            push_header(&mut self.outbound, "X-Forwarded-For", &self.client_address);
        }
        push_header(&mut self.outbound, "X-Forwarded-Host", &self.target.authority());
        push_header(&mut self.outbound, "X-Forwarded-By", &self.proxy_name);
        self.outbound.extend_from_slice(CRLF);

        Ok(RewrittenRequest {
            target: self.target,
            bytes: self.outbound,
        })
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(CRLF);
}

/// Reads the header block through `reader` and returns the rewritten request.
pub async fn rewrite_request<R>(
    reader: &mut LineReader<R>,
    client_address: &str,
    proxy_name: &str,
) -> Result<RewrittenRequest, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut rewriter = HeaderRewriter::new(client_address, proxy_name);
    while let Some(line) = reader.next_line().await? {
        rewriter.push_line(&line);
    }
    rewriter.finish()
}
