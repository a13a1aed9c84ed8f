//! The event loop.
//!
//! One thread owns the `Poller` registrations and the table of parked connections. For each
//! readiness event it disarms the socket, moves the connection out of the table and runs a
//! single attempt on a `blocking` worker. The worker sends the connection back through the
//! inbox with the interest to arm next, and wakes the loop with `Poller::notify`.
//!
//! All `Poller::add`, `modify` and `delete` calls happen on the loop thread.

use polling::{Event, Poller};
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::conn::{self, Conn, Interest, Pending, Progress};
use crate::error;

pub(crate) enum Message {
    /// A connection whose connect was just started.
    Register(Conn),
    /// An attempt finished without resolving the request.
    Park(Conn, Interest),
    /// The request resolved; the socket must be deregistered and closed.
    Retire(usize, socket2::Socket),
    /// An attempt panicked. The connection is already gone, only its slot is left.
    Abandon(usize),
}

impl From<Progress> for Message {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::Park(conn, interest) => Message::Park(conn, interest),
            Progress::Retire(key, socket) => Message::Retire(key, socket),
        }
    }
}

/// State shared by the loop thread, the client and the workers.
pub(crate) struct Shared {
    poller: Poller,
    inbox: async_channel::Sender<Message>,
    shutdown: AtomicBool,
    registered: AtomicUsize,
    retired: AtomicUsize,
    peak_dispatch: AtomicUsize,
}

impl Shared {
    /// Hand a message to the loop and wake it.
    ///
    /// If the loop is gone the message is dropped, which closes its socket and cancels its
    /// handle.
    pub(crate) fn deliver(&self, msg: Message) {
        if self.inbox.try_send(msg).is_err() {
            tracing::trace!("event loop gone, dropping message");
            return;
        }
        if let Err(err) = self.poller.notify() {
            tracing::error!("failed to wake event loop: {}", err);
        }
    }

    /// Open the connection on a worker, then register it with the loop.
    pub(crate) fn submit(self: &Arc<Self>, pending: Pending) {
        let shared = self.clone();
        blocking::unblock(move || {
            if let Some(conn) = pending.open() {
                shared.deliver(Message::Register(conn));
            }
        })
        .detach();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(err) = self.poller.notify() {
            tracing::error!("failed to wake event loop: {}", err);
        }
    }

    pub(crate) fn stats(&self) -> Stats {
        Stats {
            registered: self.registered.load(Ordering::SeqCst),
            retired: self.retired.load(Ordering::SeqCst),
            peak_dispatch_per_conn: self.peak_dispatch.load(Ordering::SeqCst),
        }
    }
}

/// Counters kept by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Connections ever registered with the loop.
    pub registered: usize,
    /// Connections deregistered and closed after resolving.
    pub retired: usize,
    /// Most I/O attempts ever outstanding at once for a single connection. Never above 1.
    pub peak_dispatch_per_conn: usize,
}

struct Slot {
    /// `None` while the connection is out on a worker.
    conn: Option<Conn>,
    dispatched: usize,
}

pub(crate) struct Reactor {
    shared: Arc<Shared>,
    inbox: async_channel::Receiver<Message>,
    slots: HashMap<usize, Slot>,
    next_key: usize,
    events: Vec<Event>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        let (sender, receiver) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            poller: Poller::new()?,
            inbox: sender,
            shutdown: AtomicBool::new(false),
            registered: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
            peak_dispatch: AtomicUsize::new(0),
        });
        Ok(Self {
            shared,
            inbox: receiver,
            slots: HashMap::new(),
            next_key: 0,
            events: Vec::new(),
        })
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub(crate) fn run(mut self) {
        tracing::debug!("event loop started");
        loop {
            self.events.clear();
            match self.shared.poller.wait(&mut self.events, None) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!("event loop wait failed: {}", err);
                    break;
                }
            }

            if self.shared.is_shutdown() {
                break;
            }

            while let Ok(msg) = self.inbox.try_recv() {
                self.handle(msg);
            }

            let events = std::mem::take(&mut self.events);
            for event in &events {
                self.on_ready(event.key);
            }
            self.events = events;
        }

        // anything still parked or queued is dropped, which cancels its handle
        self.inbox.close();
        while let Ok(msg) = self.inbox.try_recv() {
            drop(msg);
        }
        for (key, slot) in self.slots.drain() {
            if let Some(conn) = slot.conn {
                if let Err(err) = self.shared.poller.delete(conn.socket()) {
                    tracing::debug!(key, "failed to deregister socket: {}", err);
                }
            }
        }
        tracing::debug!("event loop stopped");
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Register(mut conn) => {
                let key = self.next_key;
                self.next_key += 1;
                conn.set_key(key);
                self.shared.registered.fetch_add(1, Ordering::SeqCst);

                let interest = conn.interest().event(key);
                match self.shared.poller.add(conn.socket(), interest) {
                    Ok(()) => {
                        tracing::trace!(key, "registered");
                        self.slots.insert(key, Slot { conn: Some(conn), dispatched: 0 });
                    }
                    Err(err) => {
                        // never added, so there is nothing to delete
                        if let Progress::Retire(key, socket) = conn.fail(error::connect(err)) {
                            self.shared.retired.fetch_add(1, Ordering::SeqCst);
                            conn::close(key, socket);
                        }
                    }
                }
            }
            Message::Park(conn, interest) => {
                let key = conn.key();
                let slot = match self.slots.get_mut(&key) {
                    Some(slot) => slot,
                    None => {
                        tracing::error!(key, "parked connection has no slot");
                        return;
                    }
                };
                slot.dispatched -= 1;

                match self.shared.poller.modify(conn.socket(), interest.event(key)) {
                    Ok(()) => slot.conn = Some(conn),
                    Err(err) => {
                        let err = match interest {
                            Interest::Write => error::write(err),
                            Interest::Read => error::read(err),
                        };
                        let progress = conn.fail(err);
                        self.handle(progress.into());
                    }
                }
            }
            Message::Abandon(key) => {
                self.slots.remove(&key);
                self.shared.retired.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(key, "abandoned");
            }
            Message::Retire(key, socket) => {
                self.slots.remove(&key);
                if let Err(err) = self.shared.poller.delete(&socket) {
                    tracing::debug!(key, "failed to deregister socket: {}", err);
                }
                self.shared.retired.fetch_add(1, Ordering::SeqCst);
                conn::close(key, socket);
                tracing::trace!(key, "retired");
            }
        }
    }

    fn on_ready(&mut self, key: usize) {
        let slot = match self.slots.get_mut(&key) {
            Some(slot) => slot,
            None => return,
        };
        let conn = match slot.conn.take() {
            Some(conn) => conn,
            None => {
                tracing::trace!(key, "readiness for a dispatched connection, ignoring");
                return;
            }
        };

        // oneshot mode already disarmed it, but keep it explicit
        if let Err(err) = self.shared.poller.modify(conn.socket(), Event::none(key)) {
            tracing::debug!(key, "failed to disarm socket: {}", err);
        }

        slot.dispatched += 1;
        self.shared.peak_dispatch.fetch_max(slot.dispatched, Ordering::SeqCst);
        if slot.dispatched > 1 {
            tracing::error!(key, dispatched = slot.dispatched, "connection dispatched twice");
        }

        let shared = self.shared.clone();
        blocking::unblock(move || attempt(&shared, key, move || conn.advance())).detach();
    }
}

/// Run one attempt and report back to the loop, even if the attempt panics.
///
/// A panic drops the connection while unwinding, which closes its socket and cancels its handle.
fn attempt<F>(shared: &Shared, key: usize, f: F)
where
    F: FnOnce() -> Progress,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(progress) => shared.deliver(progress.into()),
        Err(_) => {
            tracing::error!(key, "connection attempt panicked");
            shared.deliver(Message::Abandon(key));
        }
    }
}
