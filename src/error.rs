use std::io;

use thiserror::Error;

use crate::mailbox::MailboxError;
use crate::protocol::CodecError;
use crate::vfs::{AttrError, HostError};

#[derive(Debug, Error)]
pub enum Error {
    /// The host answered with a negative status.
    #[error("host: {0}")]
    Host(#[from] HostError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("mailbox: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("attributes: {0}")]
    Attr(#[from] AttrError),

    /// Reply decoded but inconsistent with the request.
    #[error("malformed reply: {0}")]
    BadReply(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A transfer would run past the largest file offset.
    #[error("transfer of {len} bytes at offset {offset} overflows")]
    OffsetOverflow { offset: u64, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn host_error(&self) -> Option<HostError> {
        match self {
            Self::Host(err) => Some(*err),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Mailbox(MailboxError::Interrupted))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            #[cfg(unix)]
            Error::Host(host) => io::Error::from_raw_os_error(host.errno()),
            Error::Mailbox(MailboxError::Io(io)) => io,
            Error::Mailbox(MailboxError::Interrupted) => {
                io::Error::new(io::ErrorKind::Interrupted, "mailbox wait interrupted")
            }
            err @ Error::OffsetOverflow { .. } => io::Error::new(io::ErrorKind::InvalidInput, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
