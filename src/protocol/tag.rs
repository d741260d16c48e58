//! Tag word layout
//!
//! ```text
//! 31      28 27                       8 7          0
//! ┌─────────┬──────────────────────────┬────────────┐
//! │ reserved│ payload length (20 bits) │ type (8)   │
//! └─────────┴──────────────────────────┴────────────┘
//! ```
//!
//! The tag is stored little-endian, payload follows immediately, and the
//! next tag starts at the next 4-byte boundary.

pub const TAG_SIZE: usize = 4;

const TYPE_BITS: u32 = 8;
const TYPE_MASK: u32 = (1 << TYPE_BITS) - 1;
const LEN_SHIFT: u32 = TYPE_BITS;
const LEN_BITS: u32 = 20;
const LEN_MASK: u32 = (1 << LEN_BITS) - 1;

/// Largest payload a single tag can describe.
pub const MAX_PAYLOAD_LEN: usize = LEN_MASK as usize;

/// Type of a tagged value on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Marker for the end of message data (never produced by the composer)
    End = 0,
    Uint32 = 1,
    Uint64 = 2,
    Int32 = 3,
    /// NUL-terminated string, length includes the terminator
    CString = 4,
    /// Raw data block
    Data = 5,
    Char = 6,
    Bool = 7,
}

impl DataType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::End),
            1 => Some(Self::Uint32),
            2 => Some(Self::Uint64),
            3 => Some(Self::Int32),
            4 => Some(Self::CString),
            5 => Some(Self::Data),
            6 => Some(Self::Char),
            7 => Some(Self::Bool),
            _ => None,
        }
    }

    /// Natural payload size of fixed-width types, `None` for variable ones.
    #[inline(always)]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Uint32 | Self::Int32 => Some(4),
            Self::Uint64 => Some(8),
            Self::Char | Self::Bool => Some(1),
            Self::End => Some(0),
            Self::CString | Self::Data => None,
        }
    }
}

/// Decoded tag word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Raw type byte; may be outside [`DataType`] on a corrupt message.
    pub type_code: u8,
    pub len: usize,
}

impl Tag {
    #[inline(always)]
    pub fn new(ty: DataType, len: usize) -> Self {
        debug_assert!(len <= MAX_PAYLOAD_LEN);
        Self {
            type_code: ty as u8,
            len,
        }
    }

    #[inline(always)]
    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_u8(self.type_code)
    }

    #[inline(always)]
    pub fn to_word(self) -> u32 {
        ((self.len as u32 & LEN_MASK) << LEN_SHIFT) | (self.type_code as u32 & TYPE_MASK)
    }

    #[inline(always)]
    pub fn from_word(word: u32) -> Self {
        Self {
            type_code: (word & TYPE_MASK) as u8,
            len: ((word >> LEN_SHIFT) & LEN_MASK) as usize,
        }
    }

    #[inline(always)]
    pub fn to_bytes(self) -> [u8; TAG_SIZE] {
        self.to_word().to_le_bytes()
    }

    #[inline(always)]
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self::from_word(u32::from_le_bytes(bytes))
    }

    /// Bytes occupied by tag + payload + padding.
    #[inline(always)]
    pub fn encoded_size(&self) -> usize {
        align4(TAG_SIZE + self.len)
    }
}

/// Round up to the next multiple of 4.
#[inline(always)]
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}
