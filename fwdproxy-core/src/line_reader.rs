//! CRLF line framing for the request header block.

use crate::http::HttpError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Splits the start of a client stream into header lines.
///
/// Lines end at `\r\n`; a lone `\r` or `\n` stays part of the line. The
/// sequence ends at the first empty line. Bytes after that line are never
/// consumed and can be recovered with [`LineReader::into_inner`].
pub struct LineReader<R> {
    reader: R,
    max_bytes: usize,
    consumed: usize,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            reader,
            max_bytes,
            consumed: 0,
            finished: false,
        }
    }

    /// Returns the next header line without its CRLF, or `None` once the
    /// blank line ending the headers has been read.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, HttpError> {
        if self.finished {
            return Ok(None);
        }

        let mut line = Vec::new();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Err(HttpError::IncompleteHeaders);
            }

            let (used, found_lf) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };

            if self.consumed + used > self.max_bytes {
                return Err(HttpError::HeadersTooLarge);
            }

            line.extend_from_slice(&available[..used]);
            self.reader.consume(used);
            self.consumed += used;

            if found_lf && line.ends_with(b"\r\n") {
                line.truncate(line.len() - 2);
                if line.is_empty() {
                    self.finished = true;
                    return Ok(None);
                }
                return Ok(Some(line));
            }
        }
    }

    /// Total header bytes consumed so far, terminators included.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
