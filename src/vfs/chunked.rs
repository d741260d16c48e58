//! Chunked file transfer
//!
//! Transfers larger than `max_data` are split into consecutive calls. A
//! short chunk ends the transfer early (end of file, disk full); a failed
//! chunk aborts it with the host error, even if earlier chunks landed.

use tracing::{debug, trace, warn};

use super::client::{status, Vfs};
use super::opcode::Opcode;
use super::types::Handle;
use crate::error::{Error, Result};
use crate::mailbox::MessageBox;

impl<M: MessageBox> Vfs<M> {
    /// Write `data` at `offset`; returns the bytes the host accepted.
    pub fn write_file(&self, h: Handle, offset: u64, data: &[u8]) -> Result<usize> {
        check_range(offset, data.len())?;
        let mut done = 0;
        for chunk in data.chunks(self.config().max_data) {
            let n = self.write_chunk(h, offset + done as u64, chunk)?;
            done += n;
            if n < chunk.len() {
                debug!(handle = %h, requested = chunk.len(), written = n, "short write");
                break;
            }
        }
        trace!(handle = %h, offset, len = data.len(), done, "write_file");
        Ok(done)
    }

    /// Read into `buf` from `offset`; returns the bytes read.
    pub fn read_file(&self, h: Handle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        check_range(offset, len)?;
        let mut done = 0;
        for chunk in buf.chunks_mut(self.config().max_data) {
            let want = chunk.len();
            let n = self.read_chunk(h, offset + done as u64, chunk)?;
            done += n;
            if n < want {
                break;
            }
        }
        trace!(handle = %h, offset, len, done, "read_file");
        Ok(done)
    }

    /// Read the whole file from offset 0.
    pub fn read_to_end(&self, h: Handle) -> Result<Vec<u8>> {
        let size = self.get_file_size(h)?;
        let size = usize::try_from(size)
            .map_err(|_| Error::BadReply(format!("file size {} too large", size)))?;
        let mut out = vec![0u8; size];
        let n = self.read_file(h, 0, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    fn write_chunk(&self, h: Handle, offset: u64, chunk: &[u8]) -> Result<usize> {
        let count = self.call(
            Opcode::WriteFile,
            |mc| {
                mc.put_int32(h.raw())?;
                mc.put_uint64(offset)?;
                mc.put_data(chunk)?;
                mc.put_uint32(chunk.len() as u32)
            },
            |md| status(md.get_int32()?),
        )? as usize;

        if count > chunk.len() {
            warn!(handle = %h, count, chunk = chunk.len(), "write count exceeds chunk");
            return Err(Error::BadReply(format!(
                "host wrote {} bytes of a {} byte chunk",
                count,
                chunk.len()
            )));
        }
        Ok(count)
    }

    fn read_chunk(&self, h: Handle, offset: u64, chunk: &mut [u8]) -> Result<usize> {
        let want = chunk.len();
        let (count, copied) = self.call(
            Opcode::ReadFile,
            |mc| {
                mc.put_int32(h.raw())?;
                mc.put_uint64(offset)?;
                mc.put_uint32(want as u32)
            },
            |md| {
                let count = status(md.get_int32()?)? as usize;
                let copied = md.get_data(chunk)?;
                Ok((count, copied))
            },
        )?;

        if count > want || count > copied {
            warn!(handle = %h, count, copied, want, "read count inconsistent with data");
            return Err(Error::BadReply(format!(
                "host reported {} bytes, sent {} for a {} byte chunk",
                count, copied, want
            )));
        }
        Ok(count)
    }
}

/// Every chunk offset of a `len` byte transfer at `offset` fits in a u64.
fn check_range(offset: u64, len: usize) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(_) => Ok(()),
        None => Err(Error::OffsetOverflow { offset, len }),
    }
}
