#![deny(unsafe_code)]

//! # fez
//!
//! A small async HTTP/1.1 client. Requests run on a single readiness event loop over
//! non-blocking sockets; each read or write attempt is offloaded to a worker, and the result
//! comes back through a `ResponseHandle` that can be awaited or waited on.
//!
//! ```no_run
//! let client = fez::Client::new()?;
//! let resp = client.get("http://example.org/")?.wait()?;
//! println!("{} {}", resp.status(), resp.text());
//! # Ok::<(), fez::ClientError>(())
//! ```

mod client;
mod error;
mod request;
mod response;

pub use client::{Client, ClientOpts, ResponseHandle, Stats};
pub use error::{ClientError, ErrorKind, Result};
pub use http::{Method, StatusCode};
pub use request::{Request, Target};
pub use response::{Headers, Response};
