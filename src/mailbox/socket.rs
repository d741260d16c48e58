//! Socket mailbox: length-prefixed frames over TCP
//!
//! Frame: `[u32 little-endian length][message]`. The guest side runs the
//! stream non-blocking under a mio `Poll` so a reply wait can be woken by
//! [`MessageBox::interrupt`] through a `Waker`.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::{CallGuard, CallLock, MailboxError, MailboxSession, MessageBox, ReplyHandler};

const STREAM_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const EVENTS_CAPACITY: usize = 16;
const FRAME_HEADER: usize = 4;

struct SocketInner {
    poll: Poll,
    events: Events,
    stream: TcpStream,
    // Pre-allocated, frame header included
    send_buffer: Box<[u8]>,
    recv_buffer: Box<[u8]>,
    recv_len: usize,
    /// Length of the complete reply frame at the front of `recv_buffer`
    reply: Option<usize>,
    /// Requests sent whose reply must be thrown away
    stale_replies: usize,
    awaiting: bool,
    /// Host closed the connection; sticky
    closed: bool,
}

/// Guest side of a TCP mailbox
pub struct SocketMailbox {
    lock: CallLock,
    inner: Mutex<SocketInner>,
    waker: Waker,
    capacity: usize,
}

impl SocketMailbox {
    /// Connect to a host listening at `addr`.
    pub fn connect(addr: SocketAddr, capacity: usize) -> Result<Self, MailboxError> {
        let stream = StdTcpStream::connect(addr)?;
        Self::from_std(stream, capacity)
    }

    /// Wrap an already connected stream.
    pub fn from_std(stream: StdTcpStream, capacity: usize) -> Result<Self, MailboxError> {
        // Disable Nagle: every message is a request/reply turn
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry().register(
            &mut stream,
            STREAM_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        debug!(peer = ?stream.peer_addr().ok(), capacity, "socket mailbox connected");

        Ok(Self {
            lock: CallLock::new(),
            inner: Mutex::new(SocketInner {
                poll,
                events: Events::with_capacity(EVENTS_CAPACITY),
                stream,
                send_buffer: vec![0u8; FRAME_HEADER + capacity].into_boxed_slice(),
                recv_buffer: vec![0u8; FRAME_HEADER + capacity].into_boxed_slice(),
                recv_len: 0,
                reply: None,
                stale_replies: 0,
                awaiting: false,
                closed: false,
            }),
            waker,
            capacity,
        })
    }
}

impl MessageBox for SocketMailbox {
    type Session<'a> = SocketSession<'a> where Self: 'a;

    fn lock(&self) -> Result<Self::Session<'_>, MailboxError> {
        let guard = self.lock.acquire()?;
        Ok(SocketSession {
            inner: self.inner.lock(),
            lock: &self.lock,
            capacity: self.capacity,
            _guard: guard,
        })
    }

    fn interrupt(&self) {
        self.lock.interrupt();
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake socket mailbox");
        }
    }

    fn interrupt_waiters(&self) {
        self.lock.interrupt_waiters();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl SocketInner {
    /// Drop the reply frame consumed by the previous call
    fn consume_reply(&mut self) {
        if let Some(len) = self.reply.take() {
            let used = FRAME_HEADER + len;
            self.recv_buffer.copy_within(used..self.recv_len, 0);
            self.recv_len -= used;
        }
    }

    /// Length of a complete frame at the front of the buffer
    fn complete_frame(&self) -> Result<Option<usize>, MailboxError> {
        if self.recv_len < FRAME_HEADER {
            return Ok(None);
        }
        let mut word = [0u8; FRAME_HEADER];
        word.copy_from_slice(&self.recv_buffer[..FRAME_HEADER]);
        let len = u32::from_le_bytes(word) as usize;

        let capacity = self.recv_buffer.len() - FRAME_HEADER;
        if len > capacity {
            return Err(MailboxError::TooLarge { len, capacity });
        }
        Ok((self.recv_len >= FRAME_HEADER + len).then_some(len))
    }

    /// Read until the socket would block. Returns bytes read.
    fn fill(&mut self) -> Result<usize, MailboxError> {
        if self.closed {
            return Err(MailboxError::Closed);
        }
        let mut total = 0;
        while self.recv_len < self.recv_buffer.len() {
            match self.stream.read(&mut self.recv_buffer[self.recv_len..]) {
                Ok(0) => {
                    self.closed = true;
                    debug!("host closed the connection");
                    return Err(MailboxError::Closed);
                }
                Ok(n) => {
                    self.recv_len += n;
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write_frame(&mut self, len: usize) -> Result<(), MailboxError> {
        self.send_buffer[..FRAME_HEADER].copy_from_slice(&(len as u32).to_le_bytes());
        let frame_len = FRAME_HEADER + len;

        let mut written = 0;
        while written < frame_len {
            match self.stream.write(&self.send_buffer[written..frame_len]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    )
                    .into())
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => self.block()?,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn block(&mut self) -> Result<(), MailboxError> {
        match self.poll.poll(&mut self.events, None) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Locked [`SocketMailbox`]
pub struct SocketSession<'a> {
    inner: MutexGuard<'a, SocketInner>,
    lock: &'a CallLock,
    capacity: usize,
    _guard: CallGuard<'a>,
}

impl SocketSession<'_> {
    /// True once the host has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.inner.closed
    }
}

impl MailboxSession for SocketSession<'_> {
    fn reserve(&mut self, max_len: usize) -> Result<&mut [u8], MailboxError> {
        self.inner.consume_reply();
        let len = max_len.min(self.capacity);
        Ok(&mut self.inner.send_buffer[FRAME_HEADER..FRAME_HEADER + len])
    }

    fn send(&mut self, len: usize) -> Result<bool, MailboxError> {
        if len > self.capacity {
            return Err(MailboxError::TooLarge {
                len,
                capacity: self.capacity,
            });
        }
        if self.inner.closed {
            return Err(MailboxError::Closed);
        }
        self.inner.write_frame(len)?;
        self.inner.awaiting = true;
        trace!(len, "request frame sent");
        Ok(false)
    }

    fn is_ready(&mut self) -> bool {
        let inner = &mut *self.inner;
        let was_closed = inner.closed;
        if let Err(e) = inner.fill() {
            // Closed is kept in `closed`; the next wait reports it
            if !was_closed {
                warn!(error = %e, "socket mailbox poll failed");
            }
            return false;
        }
        // Stale frames still count as "not ours"
        inner.stale_replies == 0 && matches!(inner.complete_frame(), Ok(Some(_)))
    }

    fn wait_for_reply(&mut self) -> Result<(), MailboxError> {
        let inner = &mut *self.inner;
        loop {
            if let Some(len) = inner.complete_frame()? {
                if inner.stale_replies > 0 {
                    inner.reply = Some(len);
                    inner.consume_reply();
                    inner.stale_replies -= 1;
                    trace!(len, "discarded stale reply");
                    continue;
                }
                inner.reply = Some(len);
                inner.awaiting = false;
                return Ok(());
            }

            if self.lock.take_interrupt() {
                return Err(MailboxError::Interrupted);
            }

            if inner.fill()? == 0 {
                inner.block()?;
            }
        }
    }

    fn receive(&mut self) -> Result<&[u8], MailboxError> {
        let len = self.inner.reply.ok_or(MailboxError::NoReply)?;
        Ok(&self.inner.recv_buffer[FRAME_HEADER..FRAME_HEADER + len])
    }
}

impl Drop for SocketSession<'_> {
    fn drop(&mut self) {
        // A reply for an abandoned request will still arrive; skip it later
        if std::mem::take(&mut self.inner.awaiting) {
            self.inner.stale_replies += 1;
            debug!(stale = self.inner.stale_replies, "request abandoned");
        }
    }
}

/// Host side: answer frames on a blocking stream until the peer closes.
pub fn serve_connection<H: ReplyHandler>(
    mut stream: StdTcpStream,
    handler: &mut H,
    capacity: usize,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut request = vec![0u8; capacity];
    let mut reply = vec![0u8; FRAME_HEADER + capacity];

    loop {
        let mut word = [0u8; FRAME_HEADER];
        match stream.read_exact(&mut word) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        let len = u32::from_le_bytes(word) as usize;
        if len > capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request of {} bytes exceeds capacity {}", len, capacity),
            ));
        }
        stream.read_exact(&mut request[..len])?;

        let n = handler
            .handle(&request[..len], &mut reply[FRAME_HEADER..])
            .min(capacity);
        reply[..FRAME_HEADER].copy_from_slice(&(n as u32).to_le_bytes());
        stream.write_all(&reply[..FRAME_HEADER + n])?;
    }
}
