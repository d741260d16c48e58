//! Message decomposer
//!
//! Reads tagged values back out of a received buffer. Each `get_*` expects
//! the next value to carry exactly the requested type.

use tracing::trace;

use super::tag::{align4, DataType, Tag, TAG_SIZE};
use super::{CodecError, CodecResult};

/// Zero-copy reader over a borrowed message
#[derive(Debug, Default)]
pub struct Decomposer<'a> {
    buffer: Option<&'a [u8]>,
    read_pos: usize,
}

impl<'a> Decomposer<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer: Some(buffer),
            read_pos: 0,
        }
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    /// (Re)bind to a message and reset the cursor
    pub fn bind(&mut self, buffer: &'a [u8]) {
        self.buffer = Some(buffer);
        self.read_pos = 0;
    }

    pub fn unbind(&mut self) {
        self.buffer = None;
        self.read_pos = 0;
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer
            .map_or(0, |b| b.len().saturating_sub(self.read_pos))
    }

    /// Type of the next value without consuming it
    pub fn peek_type(&self) -> Option<DataType> {
        self.peek_tag().ok().and_then(|t| t.data_type())
    }

    pub fn get_int32(&mut self) -> CodecResult<i32> {
        self.get_fixed::<4>(DataType::Int32).map(i32::from_le_bytes)
    }

    pub fn get_uint32(&mut self) -> CodecResult<u32> {
        self.get_fixed::<4>(DataType::Uint32).map(u32::from_le_bytes)
    }

    pub fn get_uint64(&mut self) -> CodecResult<u64> {
        self.get_fixed::<8>(DataType::Uint64).map(u64::from_le_bytes)
    }

    pub fn get_char(&mut self) -> CodecResult<u8> {
        self.get_fixed::<1>(DataType::Char).map(|[c]| c)
    }

    pub fn get_bool(&mut self) -> CodecResult<bool> {
        self.get_fixed::<1>(DataType::Bool).map(|[b]| b != 0)
    }

    /// Copy a C string (terminator included) into `dest`.
    ///
    /// Copies at most `dest.len()` bytes and returns the number copied. The
    /// cursor always moves past the whole encoded string.
    pub fn get_cstring(&mut self, dest: &mut [u8]) -> CodecResult<usize> {
        let payload = self.next_payload(DataType::CString)?;
        Ok(copy_truncated(payload, dest))
    }

    /// Copy a data block into `dest`, truncating like [`get_cstring`](Self::get_cstring).
    pub fn get_data(&mut self, dest: &mut [u8]) -> CodecResult<usize> {
        let payload = self.next_payload(DataType::Data)?;
        Ok(copy_truncated(payload, dest))
    }

    /// Borrow the next data block without copying
    pub fn get_data_ref(&mut self) -> CodecResult<&'a [u8]> {
        self.next_payload(DataType::Data)
    }

    /// Borrow the next C string without its terminator
    pub fn get_str(&mut self) -> CodecResult<&'a str> {
        let (tag, start) = self.check(DataType::CString)?;
        let payload = &self.buffer.unwrap_or_default()[start..start + tag.len];
        let text = match payload.split_last() {
            Some((0, text)) => text,
            _ => return Err(CodecError::BadString),
        };
        let text = std::str::from_utf8(text).map_err(|_| CodecError::BadString)?;
        self.read_pos = align4(start + tag.len);
        Ok(text)
    }

    fn get_fixed<const N: usize>(&mut self, ty: DataType) -> CodecResult<[u8; N]> {
        let (tag, start) = self.check(ty)?;
        if tag.len != N {
            trace!(?ty, len = tag.len, "scalar length mismatch");
            return Err(CodecError::BadLength { ty, len: tag.len });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer.unwrap_or_default()[start..start + N]);
        self.read_pos = align4(start + N);
        Ok(out)
    }

    fn next_payload(&mut self, ty: DataType) -> CodecResult<&'a [u8]> {
        let (tag, start) = self.check(ty)?;
        let payload = &self.buffer.unwrap_or_default()[start..start + tag.len];
        self.read_pos = align4(start + tag.len);
        Ok(payload)
    }

    fn peek_tag(&self) -> CodecResult<Tag> {
        let buffer = self.buffer.ok_or(CodecError::Unbound)?;
        let pos = self.read_pos;
        let word = buffer
            .get(pos..pos + TAG_SIZE)
            .ok_or(CodecError::Truncated { offset: pos })?;
        Ok(Tag::from_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Validate the next tag; returns it with its payload offset.
    /// Does not move the cursor.
    fn check(&self, ty: DataType) -> CodecResult<(Tag, usize)> {
        let tag = self.peek_tag()?;
        if tag.type_code != ty as u8 {
            trace!(expected = ?ty, found = tag.type_code, pos = self.read_pos, "type mismatch");
            return Err(CodecError::TypeMismatch {
                expected: ty,
                found: tag.type_code,
            });
        }

        let start = self.read_pos + TAG_SIZE;
        // Trailing padding of the last value may be absent
        if start + tag.len > self.buffer.map_or(0, <[u8]>::len) {
            return Err(CodecError::Truncated {
                offset: self.read_pos,
            });
        }
        Ok((tag, start))
    }
}

#[inline(always)]
fn copy_truncated(payload: &[u8], dest: &mut [u8]) -> usize {
    let n = payload.len().min(dest.len());
    dest[..n].copy_from_slice(&payload[..n]);
    n
}
