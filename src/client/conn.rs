//! Per-request connection state, and the single I/O attempts a worker runs on it.
//!
//! A `Conn` is owned by exactly one party at a time: the event loop while its socket waits
//! for readiness, or the worker running an attempt. Each attempt takes the `Conn` by value and
//! hands it back inside `Progress`, so two attempts can never touch one connection at once.

use byte_pool::BytePool;
use lazy_static::lazy_static;
use polling::Event;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};

use super::decode::{Decoded, ResponseDecoder};
use super::handle::Completer;
use crate::error::{self, ClientError};
use crate::request::Target;

lazy_static! {
    static ref CHUNKS: BytePool = BytePool::new();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connecting,
    Writing,
    Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Write,
    Read,
}

impl Interest {
    pub(crate) fn event(self, key: usize) -> Event {
        match self {
            Interest::Write => Event::writable(key),
            Interest::Read => Event::readable(key),
        }
    }
}

/// What the loop should do with a connection after an attempt.
pub(crate) enum Progress {
    /// Not done; park it and arm the interest.
    Park(Conn, Interest),
    /// The handle was resolved; deregister and close the socket.
    Retire(usize, Socket),
}

pub(crate) struct Conn {
    key: usize,
    target: Target,
    socket: Socket,
    phase: Phase,
    request: Vec<u8>,
    /// Bytes of `request` already written.
    cursor: usize,
    decoder: ResponseDecoder,
    completer: Completer,
    chunk_size: usize,
}

/// The parts of a connection known before a socket exists.
pub(crate) struct Pending {
    pub(crate) target: Target,
    pub(crate) request: Vec<u8>,
    pub(crate) completer: Completer,
    pub(crate) chunk_size: usize,
    pub(crate) max_head_length: Option<usize>,
}

impl Pending {
    /// Resolve the target and start a non-blocking connect.
    ///
    /// Address resolution may block, so this runs on a worker, never on the loop. On failure the
    /// handle is resolved here.
    pub(crate) fn open(self) -> Option<Conn> {
        match start_connect(&self.target) {
            Ok(socket) => Some(Conn {
                key: 0,
                target: self.target,
                socket,
                phase: Phase::Connecting,
                request: self.request,
                cursor: 0,
                decoder: ResponseDecoder::with_max_head_length(self.max_head_length),
                completer: self.completer,
                chunk_size: self.chunk_size,
            }),
            Err(err) => {
                tracing::debug!(host = self.target.host(), port = self.target.port(), "connect failed: {}", err);
                self.completer.complete(Err(error::connect(err)));
                None
            }
        }
    }
}

fn start_connect(target: &Target) -> io::Result<Socket> {
    let addr: SocketAddr = (target.resolve_host(), target.port())
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => {}
        #[cfg(unix)]
        Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => return Err(err),
    }
    tracing::trace!(%addr, "connecting");
    Ok(socket)
}

impl Conn {
    pub(crate) fn key(&self) -> usize {
        self.key
    }

    pub(crate) fn set_key(&mut self, key: usize) {
        self.key = key;
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Interest to arm for the current phase. Connect completion shows up as writability.
    pub(crate) fn interest(&self) -> Interest {
        match self.phase {
            Phase::Connecting | Phase::Writing => Interest::Write,
            Phase::Reading => Interest::Read,
        }
    }

    /// Run one I/O attempt for the current phase.
    pub(crate) fn advance(self) -> Progress {
        match self.phase {
            Phase::Connecting => self.finish_connect(),
            Phase::Writing => self.write_some(),
            Phase::Reading => self.read_some(),
        }
    }

    fn finish_connect(mut self) -> Progress {
        let res = match self.socket.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => self.socket.peer_addr().map(|_| ()),
        };
        match res {
            Ok(()) => {
                tracing::debug!(key = self.key, host = self.target.host(), "connected");
                self.phase = Phase::Writing;
                Progress::Park(self, Interest::Write)
            }
            // still in progress
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected) => {
                Progress::Park(self, Interest::Write)
            }
            Err(err) => self.fail(error::connect(err)),
        }
    }

    fn write_some(mut self) -> Progress {
        let res = (&self.socket).write(&self.request[self.cursor..]);
        match res {
            Ok(0) => self.fail(error::write(io::Error::from(io::ErrorKind::WriteZero))),
            Ok(n) => {
                self.cursor += n;
                tracing::trace!(key = self.key, bytes = n, remaining = self.request.len() - self.cursor, "wrote");
                if self.cursor < self.request.len() {
                    Progress::Park(self, Interest::Write)
                } else {
                    self.phase = Phase::Reading;
                    Progress::Park(self, Interest::Read)
                }
            }
            Err(err) if is_retry(&err) => Progress::Park(self, Interest::Write),
            Err(err) => self.fail(error::write(err)),
        }
    }

    fn read_some(mut self) -> Progress {
        let mut chunk = CHUNKS.alloc(self.chunk_size);
        let res = (&self.socket).read(&mut chunk[..]);
        match res {
            Ok(0) => {
                tracing::trace!(key = self.key, buffered = self.decoder.buffered(), "eof");
                let Conn { key, socket, decoder, completer, .. } = self;
                completer.complete(decoder.finish_at_eof());
                Progress::Retire(key, socket)
            }
            Ok(n) => {
                tracing::trace!(key = self.key, bytes = n, "read");
                let decoded = self.decoder.feed(&chunk[..n]);
                match decoded {
                    Ok(Decoded::NeedMore) => Progress::Park(self, Interest::Read),
                    Ok(Decoded::Complete) => {
                        let Conn { key, socket, decoder, completer, .. } = self;
                        completer.complete(decoder.finish());
                        Progress::Retire(key, socket)
                    }
                    Err(err) => self.fail(err),
                }
            }
            Err(err) if is_retry(&err) => Progress::Park(self, Interest::Read),
            Err(err) => self.fail(error::read(err)),
        }
    }

    /// Resolve the handle with `err` and give the socket back to be closed.
    pub(crate) fn fail(self, err: ClientError) -> Progress {
        tracing::debug!(key = self.key, host = self.target.host(), "request failed: {}", err);
        let Conn { key, socket, completer, .. } = self;
        completer.complete(Err(err));
        Progress::Retire(key, socket)
    }
}

fn is_retry(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Best-effort close; failures are only logged.
pub(crate) fn close(key: usize, socket: Socket) {
    if let Err(err) = socket.shutdown(Shutdown::Both) {
        if err.kind() != io::ErrorKind::NotConnected {
            tracing::debug!(key, "error closing socket: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::handle;
    use crate::error::ErrorKind;
    use std::net::TcpListener;

    fn pending(target: Target, request: &[u8]) -> (Pending, handle::ResponseHandle) {
        let (completer, handle) = handle::pair();
        let pending = Pending {
            target,
            request: request.to_vec(),
            completer,
            chunk_size: 4,
            max_head_length: None,
        };
        (pending, handle)
    }

    // Drive a connection without the loop, retrying attempts until it retires.
    fn drive(mut conn: Conn) -> usize {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match conn.advance() {
                Progress::Park(next, _) => conn = next,
                Progress::Retire(key, socket) => {
                    close(key, socket);
                    return attempts;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn test_round_trip_without_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let request = b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0; request.len()];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello").unwrap();
            buf
        });

        let (pending, handle) = pending(Target::new("127.0.0.1", port, "/"), request);
        let conn = pending.open().unwrap();
        assert_eq!(conn.interest(), Interest::Write);
        // chunks of 4 bytes need several reads
        assert!(drive(conn) > 3);

        assert_eq!(server.join().unwrap(), request.to_vec());
        let resp = handle.wait().unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.body(), b"hello");
    }

    #[test]
    fn test_unresolvable_host_fails_handle() {
        let (pending, handle) = pending(Target::new("host.invalid", 80, "/"), b"GET / HTTP/1.1\r\n\r\n");
        assert!(pending.open().is_none());
        assert_eq!(handle.wait().unwrap_err().kind(), ErrorKind::Connect);
    }
}
