//! RPC client: one blocking call per operation
//!
//! Call lifecycle:
//!   Idle -> Locked -> Sent -> AwaitingReply -> ReplyReceived -> Idle
//!
//! Every call locks the mailbox, composes `[id=0, opcode, params...]`,
//! sends, waits, then decomposes `[id, results...]`. The mailbox is
//! unlocked when the call is dropped, on success and failure alike.

use tracing::{debug, trace, warn};

use super::attr::Attributes;
use super::error::{check_status, HostError};
use super::opcode::Opcode;
use super::types::{AttrMask, Handle, OpenFlags};
use crate::config::{VfsConfig, DEFAULT_MAX_MESSAGE, MESSAGE_OVERHEAD};
use crate::error::{Error, Result};
use crate::mailbox::{MailboxSession, MessageBox};
use crate::protocol::{CodecResult, Composer, Decomposer};

/// Message id sent with every request
pub const MESSAGE_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Locked,
    Sent,
    AwaitingReply,
    ReplyReceived,
}

/// Guest-side filesystem client over a mailbox
pub struct Vfs<M: MessageBox> {
    mailbox: M,
    config: VfsConfig,
}

/// One in-flight call; owns the mailbox lock
pub(crate) struct Call<'a, M: MessageBox + 'a> {
    session: M::Session<'a>,
    op: Opcode,
    state: CallState,
    request_len: usize,
}

impl<'a, M: MessageBox + 'a> Call<'a, M> {
    fn advance(&mut self, next: CallState) {
        trace!(op = ?self.op, from = ?self.state, to = ?next, "call state");
        self.state = next;
    }

    /// Write envelope and parameters into the send buffer.
    fn compose<F>(&mut self, max_len: usize, params: F) -> Result<()>
    where
        F: FnOnce(&mut Composer<'_>) -> CodecResult<()>,
    {
        let buffer = self.session.reserve(max_len)?;
        let mut mc = Composer::new(buffer);
        mc.put_uint32(MESSAGE_ID)?;
        mc.put_uint32(self.op as u32)?;
        params(&mut mc)?;
        self.request_len = mc.size();
        Ok(())
    }

    /// Send, block for the reply, and position a decomposer past the id.
    fn transact(&mut self) -> Result<Decomposer<'_>> {
        self.session.send(self.request_len)?;
        self.advance(CallState::Sent);

        self.advance(CallState::AwaitingReply);
        self.session.wait_for_reply()?;

        self.advance(CallState::ReplyReceived);
        let (op, request_len) = (self.op, self.request_len);
        let reply = self.session.receive()?;
        debug!(?op, request = request_len, reply = reply.len(), "rpc");
        let mut md = Decomposer::new(reply);
        let id = md.get_uint32()?;
        if id != MESSAGE_ID {
            debug!(?op, id, "reply carries unexpected message id");
        }
        Ok(md)
    }
}

impl<'a, M: MessageBox + 'a> Drop for Call<'a, M> {
    fn drop(&mut self) {
        if self.state != CallState::ReplyReceived {
            debug!(op = ?self.op, state = ?self.state, "call abandoned");
        }
        trace!(op = ?self.op, from = ?self.state, to = ?CallState::Idle, "call state");
    }
}

impl<M: MessageBox> Vfs<M> {
    /// Client with default limits, lowered to fit the mailbox capacity.
    pub fn new(mailbox: M) -> Self {
        let capacity = mailbox.capacity();
        let config = VfsConfig::default().fit_to(capacity);
        if config.max_message < DEFAULT_MAX_MESSAGE {
            debug!(capacity, max_data = config.max_data, "limits lowered to mailbox capacity");
        }
        if capacity < MESSAGE_OVERHEAD {
            warn!(capacity, "mailbox too small for data transfers");
        }
        Self { mailbox, config }
    }

    /// Client with explicit limits. The mailbox must carry `max_message`.
    pub fn with_config(mailbox: M, config: VfsConfig) -> Result<Self> {
        config.validate()?;
        if config.max_message > mailbox.capacity() {
            return Err(Error::Config(format!(
                "max_message {} exceeds mailbox capacity {}",
                config.max_message,
                mailbox.capacity()
            )));
        }
        Ok(Self { mailbox, config })
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Interrupt the call in flight on the mailbox, if any.
    ///
    /// Its reply wait fails with an interrupted error. Calls queued behind
    /// it are untouched and proceed once it has released the mailbox.
    pub fn interrupt(&self) {
        self.mailbox.interrupt();
    }

    /// Fail every call currently blocked waiting for the mailbox.
    pub fn interrupt_waiters(&self) {
        self.mailbox.interrupt_waiters();
    }

    pub(crate) fn start_call(&self, op: Opcode) -> Result<Call<'_, M>> {
        let session = self.mailbox.lock()?;
        trace!(?op, from = ?CallState::Idle, to = ?CallState::Locked, "call state");
        Ok(Call {
            session,
            op,
            state: CallState::Locked,
            request_len: 0,
        })
    }

    /// Run one complete call.
    pub(crate) fn call<R, P, D>(&self, op: Opcode, params: P, results: D) -> Result<R>
    where
        P: FnOnce(&mut Composer<'_>) -> CodecResult<()>,
        D: FnOnce(&mut Decomposer<'_>) -> Result<R>,
    {
        let mut call = self.start_call(op)?;
        call.compose(self.config.max_message, params)?;
        let value = {
            let mut md = call.transact()?;
            results(&mut md)?
        };
        Self::end_call(call);
        Ok(value)
    }

    #[inline(always)]
    fn end_call(call: Call<'_, M>) {
        drop(call);
    }

    /// Call whose only result is a status.
    fn call_status<P>(&self, op: Opcode, params: P) -> Result<u32>
    where
        P: FnOnce(&mut Composer<'_>) -> CodecResult<()>,
    {
        self.call(op, params, |md| status(md.get_int32()?))
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    pub fn open_mounts(&self) -> Result<Handle> {
        self.call(Opcode::OpenMounts, |_| Ok(()), |md| handle(md.get_int32()?))
    }

    /// Read the next mount's attribute block into `buf`; returns its length.
    ///
    /// Fails with [`HostError::NoEntry`] once the list is exhausted.
    pub fn read_mounts(&self, h: Handle, mask: AttrMask, buf: &mut [u8]) -> Result<usize> {
        self.read_attr_block(Opcode::ReadMounts, h, mask, buf)
    }

    pub fn close_mounts(&self, h: Handle) -> Result<()> {
        self.call_status(Opcode::CloseMounts, |mc| mc.put_int32(h.raw()))?;
        Ok(())
    }

    // ========================================================================
    // Directories and names
    // ========================================================================

    pub fn open_dir(&self, path: &str) -> Result<Handle> {
        self.call(
            Opcode::OpenDir,
            |mc| mc.put_cstring(path),
            |md| handle(md.get_int32()?),
        )
    }

    /// Read the next entry's attribute block into `buf`; returns its length.
    pub fn read_dir(&self, h: Handle, mask: AttrMask, buf: &mut [u8]) -> Result<usize> {
        self.read_attr_block(Opcode::ReadDir, h, mask, buf)
    }

    pub fn close_dir(&self, h: Handle) -> Result<()> {
        self.call_status(Opcode::CloseDir, |mc| mc.put_int32(h.raw()))?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.call_status(Opcode::Mkdir, |mc| mc.put_cstring(path))?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.call_status(Opcode::Rmdir, |mc| mc.put_cstring(path))?;
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        self.call_status(Opcode::Remove, |mc| mc.put_cstring(path))?;
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.call_status(Opcode::Rename, |mc| {
            mc.put_cstring(from)?;
            mc.put_cstring(to)
        })?;
        Ok(())
    }

    /// Fetch the attributes of `name` into `buf`; returns the block length.
    pub fn get_attr(&self, name: &str, mask: AttrMask, buf: &mut [u8]) -> Result<usize> {
        let max = buf.len().min(u32::MAX as usize) as u32;
        self.call(
            Opcode::GetAttr,
            |mc| {
                mc.put_cstring(name)?;
                mc.put_uint32(mask.bits())?;
                mc.put_uint32(max)
            },
            |md| data_reply(md, buf),
        )
    }

    /// Set the attributes selected by `mask` from a packed block.
    pub fn set_attr(&self, name: &str, mask: AttrMask, block: &[u8]) -> Result<()> {
        self.call_status(Opcode::SetAttr, |mc| {
            mc.put_cstring(name)?;
            mc.put_uint32(mask.bits())?;
            mc.put_data(block)
        })?;
        Ok(())
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn open_file(&self, name: &str, flags: OpenFlags) -> Result<Handle> {
        self.call(
            Opcode::OpenFile,
            |mc| {
                mc.put_cstring(name)?;
                mc.put_uint32(flags.bits())
            },
            |md| handle(md.get_int32()?),
        )
    }

    pub fn close_file(&self, h: Handle) -> Result<()> {
        self.call_status(Opcode::CloseFile, |mc| mc.put_int32(h.raw()))?;
        Ok(())
    }

    pub fn get_file_size(&self, h: Handle) -> Result<u64> {
        self.call(
            Opcode::GetFileSize,
            |mc| mc.put_int32(h.raw()),
            |md| {
                status(md.get_int32()?)?;
                Ok(md.get_uint64()?)
            },
        )
    }

    pub fn set_file_size(&self, h: Handle, size: u64) -> Result<()> {
        self.call_status(Opcode::SetFileSize, |mc| {
            mc.put_int32(h.raw())?;
            mc.put_uint64(size)
        })?;
        Ok(())
    }

    pub fn file_sync(&self, h: Handle) -> Result<()> {
        self.call_status(Opcode::FileSync, |mc| mc.put_int32(h.raw()))?;
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Create `linkname` pointing at `target`.
    pub fn symlink(&self, target: &str, linkname: &str) -> Result<()> {
        self.call_status(Opcode::Symlink, |mc| {
            mc.put_cstring(target)?;
            mc.put_cstring(linkname)
        })?;
        Ok(())
    }

    /// Read the target of link `name` into `buf`; returns the host's
    /// non-negative status.
    ///
    /// The status is whatever the host reports, usually the target length.
    /// The bytes actually copied may differ; [`Vfs::readlink_string`] goes by
    /// those.
    pub fn readlink(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let (status, _) = self.readlink_into(name, buf)?;
        Ok(status as usize)
    }

    fn readlink_into(&self, name: &str, buf: &mut [u8]) -> Result<(u32, usize)> {
        let max = buf.len().min(i32::MAX as usize) as i32;
        self.call(
            Opcode::Readlink,
            |mc| {
                mc.put_cstring(name)?;
                mc.put_int32(max)
            },
            |md| {
                let status = status(md.get_int32()?)?;
                let copied = md.get_data(buf)?;
                Ok((status, copied))
            },
        )
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Every mount's attributes. The mount list is always closed.
    pub fn mounts(&self, mask: AttrMask) -> Result<Vec<Attributes>> {
        let h = self.open_mounts()?;
        let entries = self.drain(h, mask, Self::read_mounts);
        self.finish(entries, self.close_mounts(h))
    }

    /// Every entry of directory `path`. The directory is always closed.
    pub fn read_dir_all(&self, path: &str, mask: AttrMask) -> Result<Vec<Attributes>> {
        let h = self.open_dir(path)?;
        let entries = self.drain(h, mask, Self::read_dir);
        self.finish(entries, self.close_dir(h))
    }

    pub fn stat(&self, name: &str, mask: AttrMask) -> Result<Attributes> {
        let mut buf = vec![0u8; self.config.max_data];
        let n = self.get_attr(name, mask, &mut buf)?;
        Ok(Attributes::unpack(mask, &buf[..n])?)
    }

    /// Target of link `name` as a string.
    pub fn readlink_string(&self, name: &str) -> Result<String> {
        let mut buf = vec![0u8; self.config.max_data];
        let (_, n) = self.readlink_into(name, &mut buf)?;
        let target = buf[..n].split(|&b| b == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(target).into_owned())
    }

    fn read_attr_block(
        &self,
        op: Opcode,
        h: Handle,
        mask: AttrMask,
        buf: &mut [u8],
    ) -> Result<usize> {
        let max = buf.len().min(u32::MAX as usize) as u32;
        self.call(
            op,
            |mc| {
                mc.put_int32(h.raw())?;
                mc.put_uint32(mask.bits())?;
                mc.put_uint32(max)
            },
            |md| data_reply(md, buf),
        )
    }

    fn drain(
        &self,
        h: Handle,
        mask: AttrMask,
        read: fn(&Self, Handle, AttrMask, &mut [u8]) -> Result<usize>,
    ) -> Result<Vec<Attributes>> {
        let mut buf = vec![0u8; self.config.max_data];
        let mut entries = Vec::new();
        loop {
            match read(self, h, mask, &mut buf) {
                Ok(n) => entries.push(Attributes::unpack(mask, &buf[..n])?),
                Err(Error::Host(HostError::NoEntry)) => return Ok(entries),
                Err(e) => return Err(e),
            }
        }
    }

    fn finish<T>(&self, result: Result<T>, close: Result<()>) -> Result<T> {
        match (result, close) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "close after failed iteration");
                Err(e)
            }
        }
    }
}

/// Split a status into its success value or host error.
#[inline]
pub(crate) fn status(raw: i32) -> Result<u32> {
    check_status(raw).map_err(|err| {
        trace!(code = raw, %err, "host error");
        Error::Host(err)
    })
}

#[inline]
fn handle(raw: i32) -> Result<Handle> {
    status(raw)?;
    Handle::from_raw(raw).ok_or_else(|| {
        warn!(raw, "invalid handle in reply");
        Error::BadReply(format!("handle {}", raw))
    })
}

/// Status followed by a data block copied into `buf`.
fn data_reply(md: &mut Decomposer<'_>, buf: &mut [u8]) -> Result<usize> {
    status(md.get_int32()?)?;
    Ok(md.get_data(buf)?)
}
