use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

/// Handed out when a refresh starts; orders its result against other refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub version: u64,
    pub value: T,
}

/// A watched value that only accepts results newer than the one it holds.
pub struct Versioned<T> {
    next_ticket: AtomicU64,
    tx: watch::Sender<Stamped<T>>,
}

impl<T: Clone> Versioned<T> {
    pub fn new(initial: T) -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            tx: watch::Sender::new(Stamped {
                version: 0,
                value: initial,
            }),
        }
    }

    pub fn ticket(&self) -> Ticket {
        Ticket(self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn publish(&self, ticket: Ticket, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if ticket.0 <= current.version {
                return false;
            }
            current.version = ticket.0;
            current.value = value;
            true
        })
    }

    pub fn current(&self) -> T {
        self.tx.borrow().value.clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    pub fn subscribe(&self) -> watch::Receiver<Stamped<T>> {
        self.tx.subscribe()
    }
}
