//! Mailbox layer: the blocking transport between guest and host
//!
//! Design:
//! - one call at a time owns a mailbox; `lock()` blocks until it is free
//! - the returned session lends a send buffer, sends, waits, and lends
//!   the reply buffer
//! - dropping the session unlocks, on every path
//! - `interrupt()` fails the in-flight call's reply wait; `interrupt_waiters()`
//!   fails the calls queued behind it
//!
//! Implementations:
//! - [`Loopback`]: in-process, reply produced synchronously by a handler
//! - [`SharedMailbox`]: memory-mapped region shared with a host process
//! - [`SocketMailbox`]: length-prefixed frames over TCP (mio)

mod lock;
mod loopback;
mod shared;
mod socket;

pub use lock::{CallGuard, CallLock};
pub use loopback::{Loopback, LoopbackSession};
pub use shared::{SharedMailbox, SharedMailboxHost, SharedSession};
pub use socket::{serve_connection, SocketMailbox, SocketSession};

use std::io;
use thiserror::Error;

/// Transport failure, outside the normal reply path
#[derive(Debug, Error)]
pub enum MailboxError {
    /// Lock wait or reply wait was interrupted.
    #[error("mailbox wait interrupted")]
    Interrupted,

    #[error("message of {len} bytes exceeds mailbox capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },

    /// `receive` before a reply arrived.
    #[error("no reply available")]
    NoReply,

    /// An abandoned request is still being processed by the host.
    #[error("mailbox busy with an outstanding request")]
    Busy,

    #[error("connection closed by host")]
    Closed,

    #[error("invalid mailbox region: {0}")]
    BadRegion(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive, blocking message channel to the host
pub trait MessageBox: Send + Sync {
    type Session<'a>: MailboxSession
    where
        Self: 'a;

    /// Block until the mailbox is ours.
    fn lock(&self) -> Result<Self::Session<'_>, MailboxError>;

    /// Interrupt the call that holds the mailbox.
    ///
    /// Its reply wait fails with [`MailboxError::Interrupted`], whether it
    /// is already blocked or not yet waiting. Does nothing when no call is
    /// in flight, and never reaches a later call.
    fn interrupt(&self);

    /// Fail every call currently blocked in [`MessageBox::lock`].
    fn interrupt_waiters(&self);

    /// Largest message the mailbox can carry in either direction.
    fn capacity(&self) -> usize;
}

/// One locked use of a mailbox. Dropping it releases the lock.
pub trait MailboxSession {
    /// Lend a send buffer of at most `max_len` bytes.
    fn reserve(&mut self, max_len: usize) -> Result<&mut [u8], MailboxError>;

    /// Send the first `len` bytes of the reserved buffer.
    ///
    /// Returns true when a reply is already pending.
    fn send(&mut self, len: usize) -> Result<bool, MailboxError>;

    /// Non-blocking check for a pending reply.
    fn is_ready(&mut self) -> bool;

    /// Block until a reply is available.
    fn wait_for_reply(&mut self) -> Result<(), MailboxError>;

    /// Lend the reply message.
    fn receive(&mut self) -> Result<&[u8], MailboxError>;
}

/// Host-side responder: turns one request into one reply
pub trait ReplyHandler: Send {
    /// Write the reply for `request` into `reply`, return its length.
    fn handle(&mut self, request: &[u8], reply: &mut [u8]) -> usize;
}

impl<F> ReplyHandler for F
where
    F: FnMut(&[u8], &mut [u8]) -> usize + Send,
{
    fn handle(&mut self, request: &[u8], reply: &mut [u8]) -> usize {
        self(request, reply)
    }
}
