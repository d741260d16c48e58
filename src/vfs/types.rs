//! Handles, flags and object types shared with the host

use std::fmt;

use bitflags::bitflags;

/// Opaque reference to open host-side state (mount iterator, directory
/// iterator or file). Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i32);

impl Handle {
    /// `None` for negative values, which are reserved for error codes.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    #[inline(always)]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// How to open a file
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RDONLY = 1;
        const WRONLY = 2;
        const RDWR = Self::RDONLY.bits() | Self::WRONLY.bits();
        /// Create if missing
        const CREATE = 4;
        /// Fail if it already exists
        const NEW = 8;
        /// Truncate to zero length
        const TRUNCATE = 16;
    }
}

bitflags! {
    /// Attribute selection. Bit order is the packing order of attribute
    /// blocks and part of the wire contract.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrMask: u32 {
        /// u64 modification time
        const MTIME = 0x0001;
        /// u32 access permissions
        const ACCESS = 0x0002;
        /// u32 object type
        const TYPE = 0x0004;
        /// u64 size in bytes
        const SIZE = 0x0008;
        /// u64 creation time
        const CTIME = 0x0010;
        /// u64 access time
        const ATIME = 0x0020;
        /// u64 current real time on the host
        const RTIME = 0x0040;
        /// u64 disk size in bytes
        const DISKSIZE = 0x0100;
        /// u64 free disk space in bytes
        const DISKFREE = 0x0200;
        /// NUL-terminated name, always last
        const NAME = 0x8000;
    }
}

/// Kind of filesystem object
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Not found
    None = 0,
    File = 1,
    Dir = 2,
    Link = 3,
    Unknown = 4,
    Mount = 5,
}

impl ObjectType {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::None,
            1 => Self::File,
            2 => Self::Dir,
            3 => Self::Link,
            5 => Self::Mount,
            _ => Self::Unknown,
        }
    }
}
