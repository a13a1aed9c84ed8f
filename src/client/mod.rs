//! HTTP/1.1 client on a readiness event loop.
//!
//! ## Scheduling a request
//! - `Client::schedule` never blocks. It encodes the request, then a worker resolves the host
//! and starts a non-blocking connect before handing the connection to the event loop.
//! - Every request gets a fresh TCP connection, which is closed once the response is complete.
//! - A response is framed by `content-length`, or else by the server closing the connection.
//! Chunked transfer encoding is not supported.
//! - There are no timeouts or retries. `https` urls only select the default port; the
//! connection itself is plain TCP.

mod conn;
mod decode;
mod encode;
mod handle;
mod reactor;

use http::Method;
use std::thread::JoinHandle;

use crate::error::{self, ClientError};
use crate::request::{Request, Target};

use self::conn::Pending;
pub use self::handle::ResponseHandle;
use self::reactor::{Reactor, Shared};
pub use self::reactor::Stats;

pub struct ClientOpts {
    /// Size of the buffer for each read attempt.
    pub read_chunk_size: usize,
    /// Fail a response whose head grows past this many bytes. `None` is unlimited.
    pub max_head_length: Option<usize>,
}

impl Default for ClientOpts {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            max_head_length: None,
        }
    }
}

/// Handle to a running event loop.
///
/// Dropping the client, or calling `close`, stops the loop. Requests still in flight then
/// resolve to a `Canceled` error.
pub struct Client {
    shared: std::sync::Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    opts: ClientOpts,
}

impl Client {
    /// Start a client with default options.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_opts(ClientOpts::default())
    }

    /// Start a client; spawns the event loop thread.
    pub fn with_opts(opts: ClientOpts) -> Result<Self, ClientError> {
        let reactor = Reactor::new().map_err(error::io)?;
        let shared = reactor.shared();
        let thread = std::thread::Builder::new()
            .name("fez-event-loop".to_owned())
            .spawn(move || reactor.run())
            .map_err(error::io)?;

        Ok(Self {
            shared,
            thread: Some(thread),
            opts,
        })
    }

    /// Schedule a request and return a handle to its response.
    ///
    /// Only an invalid url or a closed client fail here; everything else resolves the handle.
    pub fn schedule(&self, req: Request) -> Result<ResponseHandle, ClientError> {
        if self.shared.is_shutdown() {
            return Err(error::closed());
        }

        let target = Target::parse(&req.url)?;
        let request = encode::encode(&req.method, &target, &req.headers, req.body.as_deref());
        tracing::debug!(method = %req.method, url = %req.url, "scheduling request");

        let (completer, handle) = handle::pair();
        self.shared.submit(Pending {
            target,
            request,
            completer,
            chunk_size: self.opts.read_chunk_size.max(1),
            max_head_length: self.opts.max_head_length,
        });

        Ok(handle)
    }

    pub fn request(&self, method: Method, url: &str) -> Result<ResponseHandle, ClientError> {
        self.schedule(Request::new(method, url))
    }

    pub fn request_with<I, K, V>(
        &self,
        method: Method,
        url: &str,
        headers: I,
        body: Option<Vec<u8>>,
    ) -> Result<ResponseHandle, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut req = Request::new(method, url).headers(headers);
        if let Some(body) = body {
            req = req.body(body);
        }
        self.schedule(req)
    }

    pub fn get(&self, url: &str) -> Result<ResponseHandle, ClientError> {
        self.request(Method::GET, url)
    }

    pub fn post<I, K, V>(&self, url: &str, headers: I, body: impl Into<Vec<u8>>) -> Result<ResponseHandle, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.schedule(Request::post(url).headers(headers).body(body))
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }

    /// Stop the event loop and wait for its thread to exit.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("event loop thread panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}
