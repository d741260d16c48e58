//! Protocol layer: tagged binary messages
//!
//! Design:
//! - Self-describing: every value carries a 4-byte tag (type + length)
//! - Word aligned: every tag starts on a 4-byte boundary
//! - No allocation: compose/decompose directly into/from a lent buffer

mod composer;
mod decomposer;
mod tag;

pub use composer::Composer;
pub use decomposer::Decomposer;
pub use tag::{align4, DataType, Tag, MAX_PAYLOAD_LEN, TAG_SIZE};

use thiserror::Error;

/// Local codec failure. Never fatal, and the cursor is never moved by a
/// failing call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Composer or decomposer has no buffer bound.
    #[error("no buffer bound")]
    Unbound,

    /// Not enough room left for tag, payload and padding.
    #[error("buffer full: need {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },

    /// Payload does not fit the 20-bit length field.
    #[error("payload of {0} bytes exceeds the tag length field")]
    PayloadTooLarge(usize),

    /// String contains an interior NUL and cannot be sent as a C string.
    #[error("string contains an interior NUL byte")]
    InteriorNul,

    /// Fewer bytes remain than the tag or its payload claims.
    #[error("message truncated at offset {offset}")]
    Truncated { offset: usize },

    /// Next value has a different type than requested.
    #[error("type mismatch: expected {expected:?}, found {found}")]
    TypeMismatch { expected: DataType, found: u8 },

    /// Fixed-width scalar encoded with the wrong length.
    #[error("{ty:?} encoded with length {len}")]
    BadLength { ty: DataType, len: usize },

    /// C string payload is not valid UTF-8 or lacks its terminator.
    #[error("malformed string payload")]
    BadString,
}

pub type CodecResult<T> = Result<T, CodecError>;
