//! Errors surfaced by the client, either synchronously from `schedule` or through a
//! `ResponseHandle`.

use std::error::Error as StdError;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug)]
pub struct ClientError {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<BoxError>,
}

/// Which step of the request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The url could not be turned into a target.
    Url,
    /// Address resolution, socket setup, or the connect itself failed.
    Connect,
    /// Writing the request failed.
    Write,
    /// Reading the response failed.
    Read,
    /// The response could not be decoded.
    Decode,
    /// The request was dropped before it resolved, e.g. the client shut down.
    Canceled,
    /// The client was already closed.
    Closed,
    /// Starting the client failed.
    Io,
}

impl ClientError {
    pub(crate) fn new<E: Into<BoxError>>(kind: ErrorKind, msg: Option<String>, err: Option<E>) -> Self {
        Self {
            kind,
            msg,
            source: err.map(Into::into),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the underlying io error, if this error was caused by one.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        self.source.as_ref().and_then(|err| err.downcast_ref::<std::io::Error>())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;
        let prefix = match self.kind {
            Url => "Invalid url",
            Connect => "Connect error",
            Write => "Write error",
            Read => "Read error",
            Decode => "Decode error",
            Canceled => "Request canceled",
            Closed => "Client closed",
            Io => "Io error",
        };
        match (&self.msg, &self.source) {
            (Some(msg), Some(err)) => write!(f, "{}: {}: {}", prefix, msg, err),
            (Some(msg), None) => write!(f, "{}: {}", prefix, msg),
            (None, Some(err)) => write!(f, "{}: {}", prefix, err),
            (None, None) => write!(f, "{}", prefix),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

pub(crate) fn url<S: Into<String>>(msg: S) -> ClientError {
    ClientError::new(ErrorKind::Url, Some(msg.into()), None::<ClientError>)
}

pub(crate) fn url_err<E: Into<BoxError>>(err: E) -> ClientError {
    ClientError::new(ErrorKind::Url, None, Some(err))
}

pub(crate) fn connect<E: Into<BoxError>>(err: E) -> ClientError {
    ClientError::new(ErrorKind::Connect, None, Some(err))
}

pub(crate) fn write<E: Into<BoxError>>(err: E) -> ClientError {
    ClientError::new(ErrorKind::Write, None, Some(err))
}

pub(crate) fn read<E: Into<BoxError>>(err: E) -> ClientError {
    ClientError::new(ErrorKind::Read, None, Some(err))
}

pub(crate) fn decode<S: Into<String>>(msg: S) -> ClientError {
    ClientError::new(ErrorKind::Decode, Some(msg.into()), None::<ClientError>)
}

pub(crate) fn decode_err<S: Into<String>, E: Into<BoxError>>(msg: S, err: E) -> ClientError {
    ClientError::new(ErrorKind::Decode, Some(msg.into()), Some(err))
}

pub(crate) fn canceled() -> ClientError {
    ClientError::new(ErrorKind::Canceled, None, None::<ClientError>)
}

pub(crate) fn closed() -> ClientError {
    ClientError::new(ErrorKind::Closed, None, None::<ClientError>)
}

pub(crate) fn io<E: Into<BoxError>>(err: E) -> ClientError {
    ClientError::new(ErrorKind::Io, None, Some(err))
}
