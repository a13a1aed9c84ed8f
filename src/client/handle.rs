//! One-shot delivery of a request's outcome.
//!
//! `Completer` is the sending half and is consumed by `complete`, so an outcome can be set at
//! most once. If it is dropped without completing, the `ResponseHandle` resolves to a
//! `Canceled` error instead of waiting forever.

use futures_lite::ready;
use futures_lite::stream::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{self, ClientError};
use crate::Response;

type Outcome = Result<Response, ClientError>;

pub(crate) fn pair() -> (Completer, ResponseHandle) {
    let (sender, receiver) = async_channel::bounded(1);
    (Completer { sender }, ResponseHandle { receiver })
}

pub(crate) struct Completer {
    sender: async_channel::Sender<Outcome>,
}

impl Completer {
    pub(crate) fn complete(self, outcome: Outcome) {
        if self.sender.try_send(outcome).is_err() {
            tracing::trace!("response handle dropped before completion");
        }
    }
}

pin_project_lite::pin_project! {
    /// Resolves to the response, or to the error that ended the request.
    ///
    /// Await it from any executor, or call `wait` to block the current thread.
    #[derive(Debug)]
    #[must_use = "a response handle does nothing unless awaited or waited on"]
    pub struct ResponseHandle {
        #[pin]
        receiver: async_channel::Receiver<Outcome>,
    }
}

impl ResponseHandle {
    /// Block the current thread until the request resolves.
    pub fn wait(self) -> Result<Response, ClientError> {
        futures_lite::future::block_on(self)
    }

    /// Whether the outcome is already available.
    pub fn is_ready(&self) -> bool {
        !self.receiver.is_empty() || self.receiver.is_closed()
    }
}

impl Future for ResponseHandle {
    type Output = Result<Response, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.receiver.poll_next(cx)) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Ready(Err(error::canceled())),
        }
    }
}
