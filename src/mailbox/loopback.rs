//! In-process mailbox
//!
//! The reply is produced by a [`ReplyHandler`] the moment the request is
//! sent, so `wait_for_reply` never blocks (it still honours interrupts).

use parking_lot::{Mutex, MutexGuard};

use super::{CallGuard, CallLock, MailboxError, MailboxSession, MessageBox, ReplyHandler};

struct LoopbackInner<H> {
    handler: H,
    request: Box<[u8]>,
    reply: Box<[u8]>,
    reply_len: Option<usize>,
}

/// Mailbox whose host is a local handler
pub struct Loopback<H> {
    lock: CallLock,
    inner: Mutex<LoopbackInner<H>>,
    capacity: usize,
}

impl<H: ReplyHandler> Loopback<H> {
    /// Pre-allocates request and reply buffers of `capacity` bytes.
    pub fn new(handler: H, capacity: usize) -> Self {
        Self {
            lock: CallLock::new(),
            inner: Mutex::new(LoopbackInner {
                handler,
                request: vec![0u8; capacity].into_boxed_slice(),
                reply: vec![0u8; capacity].into_boxed_slice(),
                reply_len: None,
            }),
            capacity,
        }
    }

    /// Access the handler, e.g. to inspect host state in tests.
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.lock().handler)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }
}

impl<H: ReplyHandler> MessageBox for Loopback<H> {
    type Session<'a> = LoopbackSession<'a, H> where Self: 'a;

    fn lock(&self) -> Result<Self::Session<'_>, MailboxError> {
        let guard = self.lock.acquire()?;
        Ok(LoopbackSession {
            inner: self.inner.lock(),
            lock: &self.lock,
            _guard: guard,
        })
    }

    fn interrupt(&self) {
        self.lock.interrupt();
    }

    fn interrupt_waiters(&self) {
        self.lock.interrupt_waiters();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Locked [`Loopback`]
pub struct LoopbackSession<'a, H> {
    inner: MutexGuard<'a, LoopbackInner<H>>,
    lock: &'a CallLock,
    _guard: CallGuard<'a>,
}

impl<H: ReplyHandler> MailboxSession for LoopbackSession<'_, H> {
    fn reserve(&mut self, max_len: usize) -> Result<&mut [u8], MailboxError> {
        self.inner.reply_len = None;
        let len = max_len.min(self.inner.request.len());
        Ok(&mut self.inner.request[..len])
    }

    fn send(&mut self, len: usize) -> Result<bool, MailboxError> {
        let LoopbackInner {
            handler,
            request,
            reply,
            reply_len,
        } = &mut *self.inner;

        if len > request.len() {
            return Err(MailboxError::TooLarge {
                len,
                capacity: request.len(),
            });
        }

        let n = handler.handle(&request[..len], reply);
        *reply_len = Some(n.min(reply.len()));
        Ok(true)
    }

    fn is_ready(&mut self) -> bool {
        self.inner.reply_len.is_some()
    }

    fn wait_for_reply(&mut self) -> Result<(), MailboxError> {
        if self.lock.take_interrupt() {
            return Err(MailboxError::Interrupted);
        }
        if self.inner.reply_len.is_none() {
            return Err(MailboxError::NoReply);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<&[u8], MailboxError> {
        let len = self.inner.reply_len.ok_or(MailboxError::NoReply)?;
        Ok(&self.inner.reply[..len])
    }
}
