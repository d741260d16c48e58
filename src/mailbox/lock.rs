//! Interruptible exclusive lock shared by all mailboxes
//!
//! Two kinds of interruption:
//! - [`CallLock::interrupt`] targets the call that holds the lock. Its reply
//!   wait fails, now or as soon as it starts. The request is cleared when the
//!   holder releases, so it never reaches a later call.
//! - [`CallLock::interrupt_waiters`] fails every thread queued in
//!   [`CallLock::acquire`] at that moment. Later acquirers are unaffected.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::MailboxError;

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    /// Interrupt aimed at the current holder
    holder_interrupted: bool,
    /// Bumped by `interrupt_waiters`; a queued thread fails when it changes
    waiter_epoch: u64,
    waiters: usize,
}

/// Exclusive call lock with per-holder interruption
#[derive(Debug, Default)]
pub struct CallLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl CallLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, or fail if `interrupt_waiters` runs
    /// while waiting.
    pub fn acquire(&self) -> Result<CallGuard<'_>, MailboxError> {
        let mut state = self.state.lock();
        let epoch = state.waiter_epoch;
        loop {
            if state.waiter_epoch != epoch {
                trace!("lock wait interrupted");
                return Err(MailboxError::Interrupted);
            }
            if !state.held {
                state.held = true;
                state.holder_interrupted = false;
                return Ok(CallGuard { lock: self });
            }
            state.waiters += 1;
            self.cond.wait(&mut state);
            state.waiters -= 1;
        }
    }

    /// Non-blocking acquire. `None` if held.
    pub fn try_acquire(&self) -> Option<CallGuard<'_>> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        state.holder_interrupted = false;
        Some(CallGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Threads currently queued in `acquire`.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    /// Interrupt the call holding the lock. No-op when the lock is free.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        if !state.held {
            trace!("interrupt with no call in flight");
            return;
        }
        state.holder_interrupted = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Fail every thread currently queued on the lock.
    pub fn interrupt_waiters(&self) {
        let mut state = self.state.lock();
        if state.waiters == 0 {
            return;
        }
        state.waiter_epoch = state.waiter_epoch.wrapping_add(1);
        drop(state);
        self.cond.notify_all();
    }

    /// Consume an interrupt aimed at the holder.
    pub fn take_interrupt(&self) -> bool {
        std::mem::take(&mut self.state.lock().holder_interrupted)
    }

    /// Poll `ready` every `interval` until it returns true.
    ///
    /// Called by the holder. An interrupt wakes the wait immediately and
    /// fails it.
    pub fn wait_until(
        &self,
        mut ready: impl FnMut() -> bool,
        interval: Duration,
    ) -> Result<(), MailboxError> {
        loop {
            if ready() {
                return Ok(());
            }
            let mut state = self.state.lock();
            if std::mem::take(&mut state.holder_interrupted) {
                trace!("reply wait interrupted");
                return Err(MailboxError::Interrupted);
            }
            self.cond.wait_for(&mut state, interval);
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.held = false;
        state.holder_interrupted = false;
        drop(state);
        self.cond.notify_all();
    }
}

/// Held [`CallLock`]; unlocks on drop
#[derive(Debug)]
pub struct CallGuard<'a> {
    lock: &'a CallLock,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
