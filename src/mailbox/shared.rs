//! Shared-memory mailbox over a memory-mapped file
//!
//! Layout:
//! ┌─────────────────────────────────────────────────────┐
//! │ RegionHeader (64 bytes, atomics for state/lengths)  │
//! ├─────────────────────────────────────────────────────┤
//! │ Request area (capacity bytes, written by guest)     │
//! ├─────────────────────────────────────────────────────┤
//! │ Reply area (capacity bytes, written by host)        │
//! └─────────────────────────────────────────────────────┘
//!
//! Guest and host map the same file. The guest publishes a request by
//! storing its length and flipping `state` to REQUEST (release); the host
//! answers by storing the reply length and flipping `state` to REPLY.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::{CallGuard, CallLock, MailboxError, MailboxSession, MessageBox, ReplyHandler};

#[repr(C, align(64))]
struct RegionHeader {
    magic: u64,
    version: u32,
    capacity: u32,
    state: AtomicU32,
    request_len: AtomicU32,
    reply_len: AtomicU32,
}

const MAGIC: u64 = 0x564D_4653_4D42_5831; // "VMFSMBX1"
const VERSION: u32 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();

const STATE_IDLE: u32 = 0;
const STATE_REQUEST: u32 = 1;
const STATE_REPLY: u32 = 2;

/// Default guest poll interval while waiting for the host
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Mapped region shared by both sides
struct Region {
    mmap: MmapMut,
    capacity: usize,
}

impl Region {
    fn open(path: &Path, capacity: usize) -> Result<Self, MailboxError> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(MailboxError::BadRegion(format!(
                "capacity {} out of range",
                capacity
            )));
        }

        let total_size = HEADER_SIZE + 2 * capacity;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < total_size as u64 {
            file.set_len(total_size as u64)?;
        }

        // SAFETY: file opened read/write, length checked above
        let mut mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file)? };

        // SAFETY: header lives at the start of a page-aligned mapping
        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut RegionHeader) };

        if header.magic != MAGIC {
            header.magic = MAGIC;
            header.version = VERSION;
            header.capacity = capacity as u32;
            header.state = AtomicU32::new(STATE_IDLE);
            header.request_len = AtomicU32::new(0);
            header.reply_len = AtomicU32::new(0);
        } else if header.version != VERSION || header.capacity as usize != capacity {
            return Err(MailboxError::BadRegion(format!(
                "region has version {} capacity {}, expected version {} capacity {}",
                header.version, header.capacity, VERSION, capacity
            )));
        }

        Ok(Self { mmap, capacity })
    }

    #[inline(always)]
    fn header(&self) -> &RegionHeader {
        // SAFETY: validated in open(); fields touched concurrently are atomics
        unsafe { &*(self.mmap.as_ptr() as *const RegionHeader) }
    }

    #[inline(always)]
    fn state(&self) -> u32 {
        self.header().state.load(Ordering::Acquire)
    }

    /// (request area, reply area)
    fn areas_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let capacity = self.capacity;
        self.mmap[HEADER_SIZE..HEADER_SIZE + 2 * capacity].split_at_mut(capacity)
    }
}

/// Guest side of a shared-memory mailbox
pub struct SharedMailbox {
    lock: CallLock,
    region: Mutex<Region>,
    capacity: usize,
    poll_interval: Duration,
}

impl SharedMailbox {
    /// Map (creating if needed) the region at `path`.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, MailboxError> {
        let region = Region::open(path.as_ref(), capacity)?;
        debug!(path = %path.as_ref().display(), capacity, "shared mailbox mapped");
        Ok(Self {
            lock: CallLock::new(),
            region: Mutex::new(region),
            capacity,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl MessageBox for SharedMailbox {
    type Session<'a> = SharedSession<'a> where Self: 'a;

    fn lock(&self) -> Result<Self::Session<'_>, MailboxError> {
        let guard = self.lock.acquire()?;
        Ok(SharedSession {
            region: self.region.lock(),
            lock: &self.lock,
            poll_interval: self.poll_interval,
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

/// Locked [`SharedMailbox`]
pub struct SharedSession<'a> {
    region: MutexGuard<'a, Region>,
    lock: &'a CallLock,
    poll_interval: Duration,
    _guard: CallGuard<'a>,
}

impl MailboxSession for SharedSession<'_> {
    fn reserve(&mut self, max_len: usize) -> Result<&mut [u8], MailboxError> {
        let header = self.region.header();
        match header.state.load(Ordering::Acquire) {
            // Host has not answered an abandoned request yet
            STATE_REQUEST => return Err(MailboxError::Busy),
            STATE_REPLY => header.state.store(STATE_IDLE, Ordering::Release),
            _ => {}
        }

        let len = max_len.min(self.region.capacity);
        let (request, _) = self.region.areas_mut();
        Ok(&mut request[..len])
    }

    fn send(&mut self, len: usize) -> Result<bool, MailboxError> {
        if len > self.region.capacity {
            return Err(MailboxError::TooLarge {
                len,
                capacity: self.region.capacity,
            });
        }
        let header = self.region.header();
        header.request_len.store(len as u32, Ordering::Relaxed);
        header.state.store(STATE_REQUEST, Ordering::Release);
        trace!(len, "request published");
        Ok(self.region.state() == STATE_REPLY)
    }

    fn is_ready(&mut self) -> bool {
        self.region.state() == STATE_REPLY
    }

    fn wait_for_reply(&mut self) -> Result<(), MailboxError> {
        let region = &*self.region;
        self.lock
            .wait_until(|| region.state() == STATE_REPLY, self.poll_interval)
    }

    fn receive(&mut self) -> Result<&[u8], MailboxError> {
        if self.region.state() != STATE_REPLY {
            return Err(MailboxError::NoReply);
        }
        let capacity = self.region.capacity;
        let len = (self.region.header().reply_len.load(Ordering::Relaxed) as usize).min(capacity);
        let (_, reply) = self.region.areas_mut();
        Ok(&reply[..len])
    }
}

/// Host side of a shared-memory mailbox
pub struct SharedMailboxHost {
    region: Region,
}

impl SharedMailboxHost {
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, MailboxError> {
        Ok(Self {
            region: Region::open(path.as_ref(), capacity)?,
        })
    }

    /// Serve one pending request, if any. Returns true if a reply was written.
    pub fn poll<H: ReplyHandler>(&mut self, handler: &mut H) -> bool {
        if self.region.state() != STATE_REQUEST {
            return false;
        }

        let capacity = self.region.capacity;
        let len = (self.region.header().request_len.load(Ordering::Relaxed) as usize).min(capacity);

        let (request, reply) = self.region.areas_mut();
        let n = handler.handle(&request[..len], reply).min(capacity);

        let header = self.region.header();
        header.reply_len.store(n as u32, Ordering::Relaxed);
        header.state.store(STATE_REPLY, Ordering::Release);
        trace!(request = len, reply = n, "reply published");
        true
    }
}
