use http::uri::{Scheme, Uri};
use http::Method;

use crate::error::{self, ClientError};

/// A request to be scheduled on a `Client`.
///
/// Headers keep the order they were added in. Adding a header whose name is already present
/// (ignoring case) replaces the earlier value in place.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self = self.header(k, v);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header_pairs(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// Where a request goes: host, port and the path (with query) for the request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    explicit_port: bool,
    path: String,
}

impl Target {
    /// A target with an explicit port, which is then always sent in the `Host` header.
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            explicit_port: true,
            path: path.into(),
        }
    }

    /// Decompose an absolute `http` or `https` url.
    ///
    /// The port defaults to 80 or 443 by scheme. Fragments are dropped, and an empty path is
    /// sent as `/`.
    pub fn parse(url: &str) -> Result<Self, ClientError> {
        let uri: Uri = url.parse().map_err(error::url_err)?;

        let scheme = uri
            .scheme()
            .ok_or_else(|| error::url(format!("missing scheme in {:?}", url)))?;
        let default_port = if *scheme == Scheme::HTTP {
            80
        } else if *scheme == Scheme::HTTPS {
            443
        } else {
            return Err(error::url(format!("unsupported scheme {:?}", scheme.as_str())));
        };

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| error::url(format!("missing host in {:?}", url)))?;

        // clients are not supposed to send uri frags, http::Uri already strips them.
        let mut path = uri.path().to_owned();
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host: host.to_owned(),
            port: uri.port_u16().unwrap_or(default_port),
            explicit_port: uri.port_u16().is_some(),
            path,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the `Host` header carries the port.
    pub fn has_explicit_port(&self) -> bool {
        self.explicit_port
    }

    /// Host as used for address resolution, without ipv6 brackets.
    pub(crate) fn resolve_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}
