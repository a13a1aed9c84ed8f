use http::StatusCode;

use crate::error::{self, ClientError};
use crate::response::{Headers, Response};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Progress reported after each `feed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// The response is not complete yet; keep reading.
    NeedMore,
    /// The response is complete; call `finish`.
    Complete,
}

/// The parsed response head. Never changes once parsed.
#[derive(Debug)]
struct Head {
    status: StatusCode,
    reason: String,
    headers: Headers,
    /// Byte length of the header block plus its terminator.
    len: usize,
    /// `None` means the body runs until the connection closes.
    body_len: Option<usize>,
    /// `len + body_len`, checked when the head is parsed.
    total: Option<usize>,
}

/// Incremental HTTP/1.1 response decoder.
///
/// Owns the accumulator of every byte read so far. Each `feed` appends and re-checks: first
/// for the end of the head, then, if a `content-length` was given, for the total length.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buf: Vec<u8>,
    head: Option<Head>,
    /// Where the next terminator search starts.
    scanned: usize,
    max_head_length: Option<usize>,
}

impl ResponseDecoder {
    /// Fail once this many bytes are buffered without finding the end of the head.
    pub fn with_max_head_length(max: Option<usize>) -> Self {
        Self {
            max_head_length: max,
            ..Self::default()
        }
    }

    /// Append bytes read from the connection and advance parsing.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Decoded, ClientError> {
        self.buf.extend_from_slice(bytes);

        if self.head.is_none() {
            self.parse_head()?;
        }

        match self.total_expected_length() {
            Some(total) if self.buf.len() >= total => Ok(Decoded::Complete),
            _ => Ok(Decoded::NeedMore),
        }
    }

    /// Offset in the accumulator at which the response is complete, if known.
    pub fn total_expected_length(&self) -> Option<usize> {
        self.head.as_ref().and_then(|h| h.total)
    }

    /// Bytes accumulated so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Build the response once `feed` reported `Complete`.
    ///
    /// The body is the trailing `content-length` bytes ending at the total expected length;
    /// anything the server sent past that is dropped.
    pub fn finish(self) -> Result<Response, ClientError> {
        let head = self
            .head
            .ok_or_else(|| error::decode("response head is incomplete"))?;
        let body = match (head.body_len, head.total) {
            (Some(body_len), Some(total)) => {
                if self.buf.len() < total {
                    return Err(error::decode(format!(
                        "response body is incomplete: {} of {} bytes",
                        self.buf.len() - head.len,
                        body_len
                    )));
                }
                self.buf[head.len..total].to_vec()
            }
            _ => self.buf[head.len..].to_vec(),
        };
        Ok(Response::new(head.status, head.reason, head.headers, body))
    }

    /// Build the response after the peer closed the connection.
    ///
    /// Without a `content-length`, everything after the head is the body. With one that was
    /// not reached, the bytes received so far are returned.
    pub fn finish_at_eof(self) -> Result<Response, ClientError> {
        let head = self
            .head
            .ok_or_else(|| error::decode("connection closed before the response head was complete"))?;
        let end = match (head.body_len, head.total) {
            (Some(body_len), Some(total)) => {
                if self.buf.len() < total {
                    tracing::warn!(
                        expected = body_len,
                        received = self.buf.len() - head.len,
                        "connection closed before the full body was received"
                    );
                }
                total.min(self.buf.len())
            }
            _ => self.buf.len(),
        };
        let body = self.buf[head.len..end].to_vec();
        Ok(Response::new(head.status, head.reason, head.headers, body))
    }

    fn parse_head(&mut self) -> Result<(), ClientError> {
        // the terminator may straddle the previous search boundary
        let from = self.scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        let found = self.buf[from..]
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR);

        let block_len = match found {
            Some(i) => from + i,
            None => {
                self.scanned = self.buf.len();
                if let Some(max) = self.max_head_length {
                    if self.buf.len() > max {
                        return Err(error::decode(format!(
                            "response head exceeds {} bytes",
                            max
                        )));
                    }
                }
                return Ok(());
            }
        };

        let block = String::from_utf8_lossy(&self.buf[..block_len]);
        let mut lines = block.split("\r\n");

        let status_line = lines.next().unwrap_or("");
        let (status, reason) = parse_status_line(status_line)?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = match line.find(':') {
                Some(i) => (&line[..i], &line[i + 1..]),
                None => (line, ""),
            };
            headers.insert(name.trim(), value.trim());
        }

        let body_len = match headers.get(CONTENT_LENGTH) {
            Some(len) => Some(
                len.parse::<usize>()
                    .map_err(|err| error::decode_err(format!("invalid content-length {:?}", len), err))?,
            ),
            None => None,
        };

        let len = block_len + HEAD_TERMINATOR.len();
        let total = match body_len {
            Some(body_len) => Some(
                len.checked_add(body_len)
                    .ok_or_else(|| error::decode("content-length too large"))?,
            ),
            None => None,
        };

        tracing::trace!(%status, ?body_len, head_len = block_len, "< response head");

        self.head = Some(Head {
            status,
            reason,
            headers,
            len,
            body_len,
            total,
        });
        Ok(())
    }
}

/// Split `HTTP/1.1 <code> <reason>`. A missing reason is an empty string.
fn parse_status_line(line: &str) -> Result<(StatusCode, String), ClientError> {
    let malformed = || error::decode(format!("malformed status line {:?}", line));

    let (proto, rest) = match line.find(' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => return Err(malformed()),
    };
    if !proto.starts_with("HTTP/") {
        return Err(malformed());
    }

    let (code, reason) = match rest.find(' ') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    let code = code.parse::<u16>().map_err(|_| malformed())?;
    let status = StatusCode::from_u16(code).map_err(|_| malformed())?;

    Ok((status, reason.to_owned()))
}
