use http::Method;

use crate::request::Target;

/// Encode an HTTP/1.1 request into the exact bytes sent on the wire.
///
/// Caller headers are written as given, in order. `Content-Length` is added only for a
/// non-empty body; callers should not set it themselves.
pub fn encode(
    method: &Method,
    target: &Target,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> Vec<u8> {
    let body = body.filter(|b| !b.is_empty());
    let mut buf: Vec<u8> = Vec::with_capacity(256 + body.map_or(0, |b| b.len()));

    let val = format!("{} {} HTTP/1.1\r\n", method, target.path());
    tracing::trace!("> {}", val.trim_end());
    buf.extend_from_slice(val.as_bytes());

    let val = if target.has_explicit_port() {
        format!("Host: {}:{}\r\n", target.host(), target.port())
    } else {
        format!("Host: {}\r\n", target.host())
    };
    tracing::trace!("> {}", val.trim_end());
    buf.extend_from_slice(val.as_bytes());

    for (name, value) in headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    if let Some(body) = body {
        let val = format!("Content-Length: {}\r\n", body.len());
        tracing::trace!("> {}", val.trim_end());
        buf.extend_from_slice(val.as_bytes());
    }

    buf.extend_from_slice(b"\r\n");

    if let Some(body) = body {
        buf.extend_from_slice(body);
    }

    buf
}
