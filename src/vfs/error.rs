//! Host error codes.
//!
//! Zero and positive statuses mean success; negative statuses are one of
//! the codes below, passed through from the host unchanged.

use thiserror::Error;

/// Negative status returned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum HostError {
    /// Invalid or wrong type of handle.
    #[error("bad handle")]
    BadHandle,

    /// No more entries in a mount list or directory.
    #[error("no more entries")]
    NoEntry,

    /// Ran out of memory, buffer or disk space.
    #[error("no room left")]
    NoRoom,

    /// Ran out of handles.
    #[error("too many open handles")]
    MaxHandle,

    #[error("no such mount")]
    NoMount,

    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    Permission,

    /// A path element was not a directory.
    #[error("not a directory")]
    NotDir,

    /// Path or path element too long.
    #[error("name too long")]
    TooLong,

    #[error("already exists")]
    Exists,

    #[error("directory not empty")]
    NotEmpty,

    /// Invalid operation or operand.
    #[error("invalid operation")]
    Invalid,

    #[error("is a directory")]
    IsDir,

    /// Result too large to represent.
    #[error("result too large")]
    TooBig,

    #[error("not implemented by host")]
    Unimplemented,

    /// Unexpected host error; carries the raw status.
    #[error("unknown host error {0}")]
    Unknown(i32),
}

impl HostError {
    pub const UNKNOWN_CODE: i32 = -100;

    /// Map a negative status to its error. `None` for success values.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0.. => return None,
            -1 => Self::BadHandle,
            -2 => Self::NoEntry,
            -3 => Self::NoRoom,
            -4 => Self::MaxHandle,
            -5 => Self::NoMount,
            -6 => Self::NotFound,
            -7 => Self::Permission,
            -8 => Self::NotDir,
            -9 => Self::TooLong,
            -10 => Self::Exists,
            -11 => Self::NotEmpty,
            -12 => Self::Invalid,
            -13 => Self::IsDir,
            -14 => Self::TooBig,
            -15 => Self::Unimplemented,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    /// Wire value of this error
    pub fn code(self) -> i32 {
        match self {
            Self::BadHandle => -1,
            Self::NoEntry => -2,
            Self::NoRoom => -3,
            Self::MaxHandle => -4,
            Self::NoMount => -5,
            Self::NotFound => -6,
            Self::Permission => -7,
            Self::NotDir => -8,
            Self::TooLong => -9,
            Self::Exists => -10,
            Self::NotEmpty => -11,
            Self::Invalid => -12,
            Self::IsDir => -13,
            Self::TooBig => -14,
            Self::Unimplemented => -15,
            Self::Unknown(code) => code,
        }
    }

    /// Closest POSIX errno
    #[cfg(unix)]
    pub fn errno(self) -> i32 {
        match self {
            Self::BadHandle => libc::EBADF,
            Self::NoEntry => libc::ENOENT,
            Self::NoRoom => libc::ENOSPC,
            Self::MaxHandle => libc::EMFILE,
            Self::NoMount => libc::ENODEV,
            Self::NotFound => libc::ENOENT,
            Self::Permission => libc::EACCES,
            Self::NotDir => libc::ENOTDIR,
            Self::TooLong => libc::ENAMETOOLONG,
            Self::Exists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::Invalid => libc::EINVAL,
            Self::IsDir => libc::EISDIR,
            Self::TooBig => libc::EOVERFLOW,
            Self::Unimplemented => libc::ENOSYS,
            Self::Unknown(_) => libc::EIO,
        }
    }
}

/// Split a status into success value or host error.
#[inline]
pub fn check_status(status: i32) -> Result<u32, HostError> {
    match HostError::from_code(status) {
        None => Ok(status as u32),
        Some(err) => Err(err),
    }
}
