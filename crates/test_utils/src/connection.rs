//! A scriptable in-memory connection for dispatch tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tanuki_api::*;

/// An in-memory [Connection] recording everything sent on it.
#[derive(Debug)]
pub struct StubConnection {
    open: AtomicBool,
    datagram: AtomicBool,
    closed: AtomicBool,
    idle_resets: AtomicUsize,
    sent: Mutex<Vec<Message>>,
}

impl Default for StubConnection {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(true),
            datagram: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            idle_resets: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl StubConnection {
    /// Construct an open, connection-oriented stub.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Construct an open, datagram-based stub.
    pub fn create_datagram() -> Arc<Self> {
        let out = Self::default();
        out.datagram.store(true, Ordering::SeqCst);
        Arc::new(out)
    }

    /// Mark the connection as no longer open. Sends will be refused.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// True if [Connection::close] was called.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How often the idle timer was reset.
    pub fn idle_reset_count(&self) -> usize {
        self.idle_resets.load(Ordering::SeqCst)
    }

    /// Everything sent on this connection so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connection for StubConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_datagram(&self) -> bool {
        self.datagram.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> BoxFut<'_, TnkResult<()>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(TnkError::other("connection closed"));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn reset_idle_timeout(&self) {
        self.idle_resets.fetch_add(1, Ordering::SeqCst);
    }
}
