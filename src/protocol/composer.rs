//! Message composer
//!
//! Appends tagged values to a lent buffer. The composer never owns or
//! allocates the buffer; the caller (normally the mailbox) lends it for the
//! duration of one message.

use tracing::trace;

use super::tag::{align4, DataType, Tag, MAX_PAYLOAD_LEN, TAG_SIZE};
use super::{CodecError, CodecResult};

/// Writes tagged values into a borrowed buffer
///
/// A failing `put_*` leaves both the cursor and the buffer contents
/// untouched.
#[derive(Debug, Default)]
pub struct Composer<'a> {
    buffer: Option<&'a mut [u8]>,
    write_pos: usize,
}

impl<'a> Composer<'a> {
    /// Composer bound to `buffer`, cursor at 0
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer: Some(buffer),
            write_pos: 0,
        }
    }

    /// Composer with no buffer; every put fails until [`bind`](Self::bind)
    pub fn unbound() -> Self {
        Self::default()
    }

    /// (Re)bind to a new buffer and reset the cursor
    pub fn bind(&mut self, buffer: &'a mut [u8]) {
        self.buffer = Some(buffer);
        self.write_pos = 0;
    }

    /// Release the buffer back to the caller
    pub fn unbind(&mut self) -> Option<&'a mut [u8]> {
        self.write_pos = 0;
        self.buffer.take()
    }

    pub fn is_bound(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes written so far
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.write_pos
    }

    /// Space left in the bound buffer
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, |b| b.len().saturating_sub(self.write_pos))
    }

    /// Current message content
    pub fn as_bytes(&self) -> &[u8] {
        match &self.buffer {
            Some(b) => &b[..self.write_pos],
            None => &[],
        }
    }

    pub fn put_int32(&mut self, value: i32) -> CodecResult<()> {
        self.put(DataType::Int32, &value.to_le_bytes())
    }

    pub fn put_uint32(&mut self, value: u32) -> CodecResult<()> {
        self.put(DataType::Uint32, &value.to_le_bytes())
    }

    pub fn put_uint64(&mut self, value: u64) -> CodecResult<()> {
        self.put(DataType::Uint64, &value.to_le_bytes())
    }

    pub fn put_char(&mut self, value: u8) -> CodecResult<()> {
        self.put(DataType::Char, &[value])
    }

    pub fn put_bool(&mut self, value: bool) -> CodecResult<()> {
        self.put(DataType::Bool, &[value as u8])
    }

    /// Append a string with its NUL terminator.
    pub fn put_cstring(&mut self, value: &str) -> CodecResult<()> {
        let bytes = value.as_bytes();
        if bytes.contains(&0) {
            return Err(CodecError::InteriorNul);
        }
        self.put_parts(DataType::CString, bytes, true)
    }

    /// Append a raw data block.
    pub fn put_data(&mut self, data: &[u8]) -> CodecResult<()> {
        self.put(DataType::Data, data)
    }

    #[inline(always)]
    fn put(&mut self, ty: DataType, payload: &[u8]) -> CodecResult<()> {
        self.put_parts(ty, payload, false)
    }

    fn put_parts(&mut self, ty: DataType, payload: &[u8], nul: bool) -> CodecResult<()> {
        let len = payload.len() + nul as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(len));
        }

        let start = self.write_pos;
        let buffer = self.buffer.as_deref_mut().ok_or(CodecError::Unbound)?;

        let end = align4(start + TAG_SIZE + len);
        if end > buffer.len() {
            trace!(?ty, len, start, capacity = buffer.len(), "compose overflow");
            return Err(CodecError::Overflow {
                needed: end - start,
                available: buffer.len().saturating_sub(start),
            });
        }

        let payload_start = start + TAG_SIZE;
        buffer[start..payload_start].copy_from_slice(&Tag::new(ty, len).to_bytes());
        buffer[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        // Terminator and padding
        buffer[payload_start + payload.len()..end].fill(0);

        self.write_pos = end;
        Ok(())
    }
}
